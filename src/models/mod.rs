mod test_object;
mod test_object_type;
pub mod payloads;

pub use payloads::*;
pub use test_object::*;
pub use test_object_type::TestObjectType;
