//! Useful macros for parsing fixed-layout byte structures.
//!
//! The structure must hold its bytes in a field called `data`.

macro_rules! define_field {
    ($name:ident, u16, $offset:expr) => {
        /// Get the value from the $name field
        pub fn $name(&self) -> u16 {
            LittleEndian::read_u16(&self.data[$offset..$offset + 2])
        }
    };

    ($name:ident, u32, $offset:expr) => {
        /// Get the $name field
        pub fn $name(&self) -> u32 {
            LittleEndian::read_u32(&self.data[$offset..$offset + 4])
        }
    };

    ($name:ident, fourcc, $offset:expr) => {
        /// Get the four character code in the $name field
        pub fn $name(&self) -> [u8; 4] {
            let mut code = [0u8; 4];
            code.copy_from_slice(&self.data[$offset..$offset + 4]);
            code
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
