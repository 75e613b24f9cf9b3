//! Text renderings of a table: one for embedding, one for the prompt.

use crate::models::schema::TableSchema;

impl TableSchema {
    /// Name, description and every field's name/type/description, space joined.
    pub fn embed_text(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if !self.description.trim().is_empty() {
            parts.push(self.description.trim().to_string());
        }
        for field in &self.fields {
            parts.push(format!("{} {}", field.name, field.field_type));
            if !field.description.trim().is_empty() {
                parts.push(field.description.trim().to_string());
            }
        }
        parts.join(" ")
    }

    /// Schema block injected into the agent's system prompt.
    pub fn context_block(&self) -> String {
        let mut block = format!("Table: {}\n", self.name);
        if !self.description.trim().is_empty() {
            block.push_str(&format!("Description: {}\n", self.description.trim()));
        }
        block.push_str("Columns:\n");
        for field in &self.fields {
            let mut flags = Vec::new();
            if field.is_primary_key {
                flags.push("primary key".to_string());
            }
            if field.is_foreign_key {
                if field.foreign_table.is_empty() {
                    flags.push("foreign key".to_string());
                } else {
                    flags.push(format!("foreign key to {}", field.foreign_table));
                }
            }

            block.push_str(&format!("- {} {}", field.name, field.field_type));
            if !flags.is_empty() {
                block.push_str(&format!(" ({})", flags.join(", ")));
            }
            if !field.description.trim().is_empty() {
                block.push_str(&format!(": {}", field.description.trim()));
            }
            block.push('\n');
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::models::schema::{SchemaFieldRow, TableSchema};

    fn orders_table() -> TableSchema {
        let table_id = Uuid::new_v4();
        let field = |name: &str, ty: &str, pk: bool, fk: &str, position: i32| SchemaFieldRow {
            id: Uuid::new_v4(),
            table_id,
            name: name.to_string(),
            field_type: ty.to_string(),
            description: String::new(),
            is_primary_key: pk,
            is_foreign_key: !fk.is_empty(),
            foreign_table: fk.to_string(),
            position,
        };
        TableSchema {
            id: table_id,
            connection_id: Uuid::new_v4(),
            name: "orders".to_string(),
            description: "One row per checkout".to_string(),
            fields: vec![
                field("id", "integer", true, "", 0),
                field("customer_id", "integer", false, "customers", 1),
                field("total", "numeric", false, "", 2),
            ],
        }
    }

    #[test]
    fn test_context_block_lists_keys_and_links() {
        let block = orders_table().context_block();
        assert!(block.starts_with("Table: orders\n"));
        assert!(block.contains("Description: One row per checkout"));
        assert!(block.contains("- id integer (primary key)"));
        assert!(block.contains("- customer_id integer (foreign key to customers)"));
        assert!(block.contains("- total numeric\n"));
    }

    #[test]
    fn test_embed_text_skips_empty_descriptions() {
        let text = orders_table().embed_text();
        assert_eq!(
            text,
            "orders One row per checkout id integer customer_id integer total numeric"
        );
    }
}
