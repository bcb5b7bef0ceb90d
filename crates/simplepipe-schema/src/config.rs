/// How payload schemas are compiled and which bodies they apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Close every object schema (`additionalProperties: false`) unless it
    /// says otherwise.
    pub close_objects: bool,
    /// Reject bodies whose tag has no schema instead of letting them through.
    pub require_schema: bool,
    /// Let `SPS` sequence acknowledgements through without a schema, even
    /// when `require_schema` is set.
    pub skip_sequence_acks: bool,
    /// Maximum number of `<Tag>.schema.json` files loaded from a directory.
    pub max_directory_schemas: usize,
    /// Maximum size of a single schema file, in bytes.
    pub max_schema_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            close_objects: false,
            require_schema: false,
            skip_sequence_acks: true,
            max_directory_schemas: 256,
            max_schema_bytes: 256 * 1024,
        }
    }
}
