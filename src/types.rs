use crate::constants::{
    COMPANY_TABLE_NAME, DEFAULT_SCHEMA, ID_FIELD_NAME, JSON_FIELD_NAME, KEY_FIELD_NAME,
    META_TABLE_NAME, PARTNERS_JSON_FIELD_NAME, VALUE_FIELD_NAME,
};

/// Table and field names the statement templates are rendered against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    /// Schema both tables live in
    pub schema: String,
    /// Company table
    pub company_table: String,
    /// Metadata table
    pub meta_table: String,
    /// Numeric identifier column
    pub id_field: String,
    /// JSON payload column
    pub json_field: String,
    /// Metadata key column
    pub key_field: String,
    /// Metadata value column
    pub value_field: String,
    /// Key of the partners array inside the JSON payload
    pub partners_field: String,
}

impl Naming {
    /// Default naming convention under `schema`
    pub fn new(schema: impl Into<String>) -> Self {
        Naming {
            schema: schema.into(),
            company_table: COMPANY_TABLE_NAME.to_string(),
            meta_table: META_TABLE_NAME.to_string(),
            id_field: ID_FIELD_NAME.to_string(),
            json_field: JSON_FIELD_NAME.to_string(),
            key_field: KEY_FIELD_NAME.to_string(),
            value_field: VALUE_FIELD_NAME.to_string(),
            partners_field: PARTNERS_JSON_FIELD_NAME.to_string(),
        }
    }

    /// Company table in dot-notation
    pub fn company_table_full_name(&self) -> String {
        format!("{}.{}", self.schema, self.company_table)
    }

    /// Metadata table in dot-notation
    pub fn meta_table_full_name(&self) -> String {
        format!("{}.{}", self.schema, self.meta_table)
    }

    /// Resolve a template placeholder
    pub(crate) fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "schema" => self.schema.clone(),
            "company_table" => self.company_table.clone(),
            "meta_table" => self.meta_table.clone(),
            "company_table_full" => self.company_table_full_name(),
            "meta_table_full" => self.meta_table_full_name(),
            "id_field" => self.id_field.clone(),
            "json_field" => self.json_field.clone(),
            "key_field" => self.key_field.clone(),
            "value_field" => self.value_field.clone(),
            "partners_field" => self.partners_field.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Every configured name, labelled, for validation
    pub(crate) fn names(&self) -> [(&'static str, &str); 8] {
        [
            ("schema", &self.schema),
            ("company_table", &self.company_table),
            ("meta_table", &self.meta_table),
            ("id_field", &self.id_field),
            ("json_field", &self.json_field),
            ("key_field", &self.key_field),
            ("value_field", &self.value_field),
            ("partners_field", &self.partners_field),
        ]
    }
}

impl Default for Naming {
    fn default() -> Self {
        Naming::new(DEFAULT_SCHEMA)
    }
}
