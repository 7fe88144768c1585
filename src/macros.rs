//! # Internal Macros
//!
//! `le_accessors!` turns the little-endian fields of an on-disk header into
//! native-integer getters and `set_` setters. The field's storage type is the
//! zerocopy wrapper named after the native type (`u64` is stored as `U64`).
//!
//! ```ignore
//! impl FreeNodeHeader {
//!     le_accessors! {
//!         node_type: u16,
//!         next: u64,
//!     }
//! }
//!
//! // header.next() -> u64, header.set_next(7)
//! ```

macro_rules! le_accessors {
    ($($field:ident: $native:ident),* $(,)?) => {
        ::paste::paste! {
            $(
                #[inline]
                pub fn $field(&self) -> $native {
                    self.$field.get()
                }

                #[inline]
                pub fn [<set_ $field>](&mut self, value: $native) {
                    self.$field = ::zerocopy::little_endian::[<$native:upper>]::new(value);
                }
            )*
        }
    };
}
