use crate::codec::{WireReader, WireWriter};
use crate::core::{Key, Result};
use crate::lifecycle::Binding;

/// Static declaration of a persistable domain type.
///
/// Implemented by hand or through [`domain_type!`](crate::domain_type). The
/// value itself holds only domain fields; key, state and version live in
/// the surrounding [`Entity`](crate::lifecycle::Entity).
pub trait DomainType: Sized + Send + Sync + 'static {
    type Key: Key;

    /// Wire discriminator, at or above
    /// [`FIRST_USER_DISCRIMINATOR`](crate::codec::FIRST_USER_DISCRIMINATOR).
    const DISCRIMINATOR: i32;

    const NAME: &'static str;

    /// Default field values. Relations are set up here from `binding`.
    fn create(binding: &Binding<Self>) -> Self;

    fn encode_fields(&self, writer: &mut WireWriter<'_>) -> Result<()>;

    fn decode_fields(&mut self, reader: &mut WireReader<'_>) -> Result<()>;
}
