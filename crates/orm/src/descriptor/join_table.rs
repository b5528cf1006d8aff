/// A many-to-many association table.
///
/// Entities supply these themselves, through `#[stout(join_tables = "path")]` or
/// [EntityMetadata::join_tables](crate::EntityMetadata::join_tables).  Both columns hold integer keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinTable {
    name: String,
    join_column: String,
    inverse_join_column: String,
    create_table_statement: String,
}

impl JoinTable {
    /// `join_column` refers to the owning side, `inverse_join_column` to the entity on the other side.
    pub fn new(
        name: impl Into<String>,
        join_column: impl Into<String>,
        inverse_join_column: impl Into<String>,
    ) -> JoinTable {
        let name = name.into();
        let join_column = join_column.into();
        let inverse_join_column = inverse_join_column.into();
        let create_table_statement = format!(
            "CREATE TABLE IF NOT EXISTS {} ({a} INTEGER NOT NULL, {b} INTEGER NOT NULL, PRIMARY KEY ({a}, {b}))",
            name,
            a = join_column,
            b = inverse_join_column
        );

        JoinTable {
            name,
            join_column,
            inverse_join_column,
            create_table_statement,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join_column(&self) -> &str {
        &self.join_column
    }

    pub fn inverse_join_column(&self) -> &str {
        &self.inverse_join_column
    }

    pub fn create_table_statement(&self) -> &str {
        &self.create_table_statement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_ddl() {
        let jt = JoinTable::new("tag_item", "tag_id", "item_id");
        assert_eq!(
            jt.create_table_statement(),
            "CREATE TABLE IF NOT EXISTS tag_item (tag_id INTEGER NOT NULL, item_id INTEGER NOT NULL, PRIMARY KEY (tag_id, item_id))"
        );
    }
}
