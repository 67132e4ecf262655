//! Test fixture utilities.

use relcore_client::{Command, MigrationCommand, MigrationCommandProducer};

/// A test database whose create and drop scripts use SQL Server syntax.
#[derive(Debug, Clone)]
pub struct TestDatabase {
    /// Database name.
    pub database: String,
    /// Tables created by [`MigrationCommandProducer::create_tables_commands`].
    pub tables: Vec<String>,
}

impl TestDatabase {
    /// Create a fixture for `database`.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: Vec::new(),
        }
    }

    /// Add a table to the fixture.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    /// SQL answering whether the database exists.
    #[must_use]
    pub fn exists_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM sys.databases WHERE name = N'{db}'",
            db = self.database
        )
    }

    /// SQL answering whether the database has user tables.
    #[must_use]
    pub fn has_tables_sql(&self) -> String {
        "SELECT COUNT(*) FROM sys.tables WHERE is_ms_shipped = 0".to_string()
    }

    /// SQL creating the database.
    #[must_use]
    pub fn create_database_sql(&self) -> String {
        format!("CREATE DATABASE [{db}]", db = self.database)
    }

    /// SQL dropping the database.
    #[must_use]
    pub fn drop_database_sql(&self) -> String {
        format!("DROP DATABASE [{db}]", db = self.database)
    }

    /// SQL creating one table.
    #[must_use]
    pub fn create_table_sql(table: &str) -> String {
        format!("CREATE TABLE [{table}] ([Id] int NOT NULL PRIMARY KEY)")
    }
}

impl MigrationCommandProducer for TestDatabase {
    fn exists_command(&self) -> Command {
        Command::new(self.exists_sql(), Vec::new())
    }

    fn has_tables_command(&self) -> Command {
        Command::new(self.has_tables_sql(), Vec::new())
    }

    fn create_database_commands(&self) -> Vec<MigrationCommand> {
        vec![MigrationCommand::suppressed(Command::new(
            self.create_database_sql(),
            Vec::new(),
        ))]
    }

    fn drop_database_commands(&self) -> Vec<MigrationCommand> {
        vec![MigrationCommand::suppressed(Command::new(
            self.drop_database_sql(),
            Vec::new(),
        ))]
    }

    fn create_tables_commands(&self) -> Vec<MigrationCommand> {
        self.tables
            .iter()
            .map(|t| MigrationCommand::new(Command::new(Self::create_table_sql(t), Vec::new())))
            .collect()
    }
}
