/// Declares a domain type and its [`DomainType`](crate::registry::DomainType)
/// implementation.
///
/// Fields are written in declaration order, each as a tagged value, and take
/// their `Default` when an entity is created. Relations are built from the
/// entity [`Binding`](crate::lifecycle::Binding) and are not serialized.
///
/// A `<Name>Fields` trait is generated for `Entity<Name>` with a guarded
/// getter and `set_<field>` per field and a handle getter per relation.
/// Field names must not clash with `Entity` methods such as `key` or `state`.
///
/// ```ignore
/// domain_type! {
///     #[derive(Debug)]
///     pub struct Invoice(40, Identity) {
///         number: String,
///         total: Decimal,
///     }
///     relations {
///         lines: Relation<Invoice, InvoiceLine> = invoice_lines,
///     }
/// }
/// ```
#[macro_export]
macro_rules! domain_type {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($discriminator:expr, $key:ty) {
            $( $field:ident : $field_ty:ty ),* $(,)?
        }
        $( relations { $( $relation:ident : $relation_ty:ty = $init:expr ),+ $(,)? } )?
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( pub $field: $field_ty, )*
            $($( pub $relation: $relation_ty, )+)?
        }

        impl $crate::registry::DomainType for $name {
            type Key = $key;
            const DISCRIMINATOR: i32 = $discriminator;
            const NAME: &'static str = stringify!($name);

            #[allow(unused_variables)]
            fn create(binding: &$crate::lifecycle::Binding<Self>) -> Self {
                Self {
                    $( $field: ::core::default::Default::default(), )*
                    $($( $relation: ($init)(binding), )+)?
                }
            }

            #[allow(unused_variables)]
            fn encode_fields(
                &self,
                writer: &mut $crate::codec::WireWriter<'_>,
            ) -> $crate::core::Result<()> {
                $( $crate::codec::WireField::write_field(&self.$field, writer)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode_fields(
                &mut self,
                reader: &mut $crate::codec::WireReader<'_>,
            ) -> $crate::core::Result<()> {
                $( self.$field = $crate::codec::WireField::read_field(reader)?; )*
                Ok(())
            }
        }

        $crate::paste::paste! {
            $vis trait [<$name Fields>] {
                $(
                    fn $field(&self) -> $crate::core::Result<$field_ty>;

                    fn [<set_ $field>](&self, value: $field_ty) -> $crate::core::Result<()>;
                )*
                $($(
                    fn $relation(&self) -> $relation_ty;
                )+)?
            }

            impl [<$name Fields>] for $crate::lifecycle::Entity<$name> {
                $(
                    fn $field(&self) -> $crate::core::Result<$field_ty> {
                        self.read(|data| ::core::clone::Clone::clone(&data.$field))
                    }

                    fn [<set_ $field>](&self, value: $field_ty) -> $crate::core::Result<()> {
                        self.set(
                            |data: &mut $name| &mut data.$field,
                            $crate::codec::WireField::to_wire_precision(value),
                        )
                    }
                )*
                $($(
                    fn $relation(&self) -> $relation_ty {
                        self.peek(|data| ::core::clone::Clone::clone(&data.$relation))
                    }
                )+)?
            }
        }
    };
}
