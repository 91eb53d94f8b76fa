/// Declare a configuration struct together with its partial-update twin.
///
/// The twin has every field wrapped in `Option`; `apply_to` copies only the
/// fields that are present, which is how every "changed" event merges.
macro_rules! with_changes {
    (
        $(#[$meta:meta])*
        pub struct $name:ident / $changes:ident {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident : $ty:ty
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )+
        }

        #[doc = concat!(
            "Partial update of [`", stringify!($name), "`]. Absent fields stay untouched."
        )]
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $changes {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl $changes {
            pub fn apply_to(self, target: &mut $name) {
                $(
                    if let Some(value) = self.$field {
                        target.$field = value;
                    }
                )+
            }

            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())+
            }
        }
    };
}
