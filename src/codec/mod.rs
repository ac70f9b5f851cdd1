pub mod discriminator;
pub mod field;
pub mod reader;
pub mod value;
pub mod writer;

pub use discriminator::{
    FIRST_USER_DISCRIMINATOR, RESERVED_DISCRIMINATORS, SystemType, is_reserved_discriminator,
    is_user_discriminator,
};
pub use field::WireField;
pub use reader::WireReader;
pub use value::{Decimal, WireList, WireValue};
pub use writer::{WireWriter, to_tick_precision};
