//! Macro definitions for persistence.
//!
//! `entity!` declares a document-backed entity: the struct itself, typed
//! getters, dirty-tracking setters, builder-style constructors and the
//! [`Entity`](crate::persist::Entity) implementation.
//!
//! ```ignore
//! rollstock::entity! {
//!     #[entity(doc_type = "railroad", counter_key = "railroads")]
//!     pub struct Railroad {
//!         reporting_mark: String,
//!         name: String,
//!     }
//! }
//! ```
//!
//! An optional `prepare_save = path::to_fn` names a `fn(&mut Self)` hook run
//! before every save.

#[macro_export]
macro_rules! entity {
    (
        #[entity(doc_type = $doc_type:literal, counter_key = $counter_key:literal $(, prepare_save = $hook:path)?)]
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$field_meta:meta])* $field:ident : $field_ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            $( $field: Option<$field_ty>, )+
            __state: $crate::persist::EntityState,
        }

        impl $name {
            /// Empty, unsaved instance.
            pub fn new() -> Self {
                Self::default()
            }

            /// Pre-assigns the id (imports keep their original ids).
            pub fn with_id(mut self, id: i64) -> Self {
                self.__state.id = Some(id);
                self
            }

            $crate::paste::paste! {
                $(
                    $(#[$field_meta])*
                    pub fn $field(&self) -> Option<$field_ty> {
                        self.$field.clone()
                    }

                    /// Generated typed setter; marks the entity dirty on change.
                    pub fn [<set_ $field>](&mut self, value: impl Into<$field_ty>) {
                        self.[<replace_ $field>](Some(value.into()));
                    }

                    /// Generated setter clearing the field; marks the entity dirty on change.
                    pub fn [<clear_ $field>](&mut self) {
                        self.[<replace_ $field>](None);
                    }

                    /// Generated builder-style setter for unsaved instances.
                    pub fn [<with_ $field>](mut self, value: impl Into<$field_ty>) -> Self {
                        self.$field = Some(value.into());
                        self
                    }

                    fn [<replace_ $field>](&mut self, value: Option<$field_ty>) {
                        if self.$field != value {
                            self.$field = value;
                            self.__state.mark_dirty();
                        }
                    }
                )+
            }
        }

        impl $crate::persist::Entity for $name {
            const DOC_TYPE: &'static str = $doc_type;
            const COUNTER_KEY: &'static str = $counter_key;

            fn schema() -> &'static [$crate::persist::FieldDef] {
                const FIELDS: &[$crate::persist::FieldDef] = &[
                    $(
                        $crate::persist::FieldDef {
                            name: stringify!($field),
                            kind: <$field_ty as $crate::persist::FieldValue>::KIND,
                        },
                    )+
                ];
                FIELDS
            }

            fn state(&self) -> &$crate::persist::EntityState {
                &self.__state
            }

            fn state_mut(&mut self) -> &mut $crate::persist::EntityState {
                &mut self.__state
            }

            fn to_fields(&self) -> $crate::serde_json::Map<String, $crate::serde_json::Value> {
                let mut fields = $crate::serde_json::Map::new();
                fields.insert(
                    "id".to_string(),
                    self.__state
                        .id
                        .map($crate::serde_json::Value::from)
                        .unwrap_or($crate::serde_json::Value::Null),
                );
                $(
                    fields.insert(
                        stringify!($field).to_string(),
                        self.$field
                            .as_ref()
                            .map($crate::persist::FieldValue::to_json)
                            .unwrap_or($crate::serde_json::Value::Null),
                    );
                )+
                fields
            }

            fn from_fields(
                fields: &$crate::serde_json::Map<String, $crate::serde_json::Value>,
            ) -> $crate::core::Result<Self> {
                Ok(Self {
                    $(
                        $field: $crate::persist::read_field::<$field_ty>(
                            $doc_type,
                            fields,
                            stringify!($field),
                        )?,
                    )+
                    __state: $crate::persist::EntityState::default(),
                })
            }

            fn field(&self, name: &str) -> Option<$crate::serde_json::Value> {
                if name == "id" {
                    return self.__state.id.map($crate::serde_json::Value::from);
                }
                $(
                    if name == stringify!($field) {
                        return self.$field.as_ref().map($crate::persist::FieldValue::to_json);
                    }
                )+
                None
            }

            $(
                fn prepare_save(&mut self) {
                    $hook(self);
                }
            )?
        }
    };
}
