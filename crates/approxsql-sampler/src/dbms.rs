//! The engine adapter. Only `execute` and `execute_update` are required;
//! every dialect hook has an ANSI-leaning default that adapters override.

use approxsql_common::{Error, QueryResult, Result, SampleParam, TableName, Value};
use approxsql_ir::{Expr, Relation};
use indexmap::IndexMap;

pub trait Dbms {
    fn execute(&self, sql: &str) -> Result<QueryResult>;

    fn execute_update(&self, sql: &str) -> Result<()>;

    fn quote_char(&self) -> char {
        '"'
    }

    /// Quotes an identifier part unless it is a plain identifier.
    fn quote(&self, ident: &str) -> String {
        let mut chars = ident.chars();
        let plain = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            ident.to_string()
        } else {
            let q = self.quote_char();
            format!("{q}{}{q}", ident.replace(q, &format!("{q}{q}")))
        }
    }

    fn quote_table(&self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(&table.table)),
            None => self.quote(&table.table),
        }
    }

    /// Deterministic bucket in `[0, modulus)` of a column's value.
    fn mod_of_hash(&self, column: &str, modulus: u32) -> String {
        format!("MOD(ABS(HASH({})), {})", column, modulus)
    }

    /// Random bucket in `[0, modulus)`.
    fn mod_of_rand(&self, modulus: u32) -> String {
        format!("CAST(FLOOR(RANDOM() * {}) AS INTEGER)", modulus)
    }

    /// Uniform draw in `[0, 1)` used to order or weight rows of a sample build.
    fn random_number_expression(&self, _sample: &SampleParam) -> String {
        "RANDOM()".to_string()
    }

    fn create_meta_tables(&self, size_table: &TableName, name_table: &TableName) -> Result<()> {
        update(
            self,
            format!(
                "CREATE TABLE IF NOT EXISTS {} (schemaname VARCHAR, tablename VARCHAR, \
                 samplesize BIGINT, originaltablesize BIGINT)",
                self.quote_table(size_table)
            ),
        )?;
        update(
            self,
            format!(
                "CREATE TABLE IF NOT EXISTS {} (originalschemaname VARCHAR, originaltablename VARCHAR, \
                 sampleschemaname VARCHAR, sampletablename VARCHAR, sampletype VARCHAR, \
                 samplingratio DOUBLE, columnnames VARCHAR)",
                self.quote_table(name_table)
            ),
        )
    }

    /// Ordered column name to type map, names lower-cased.
    fn get_columns(&self, table: &TableName) -> Result<IndexMap<String, String>> {
        let result = query(self, columns_query(table))?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get(0)?.as_str()?.to_lowercase();
                let data_type = row.get(1).map(|v| v.to_string()).unwrap_or_default();
                Some((name, data_type))
            })
            .collect())
    }

    fn get_table_size(&self, table: &TableName) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quote_table(table));
        let result = query(self, sql.clone())?;
        result
            .scalar()
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::execution(sql, "COUNT(*) returned no row count"))
    }

    fn create_table_as(&self, table: &TableName, source: &Relation) -> Result<()> {
        update(
            self,
            format!("CREATE TABLE {} AS {}", self.quote_table(table), source.to_sql()),
        )
    }

    fn drop_table(&self, table: &TableName) -> Result<()> {
        update(self, format!("DROP TABLE IF EXISTS {}", self.quote_table(table)))
    }

    fn move_table(&self, from: &TableName, to: &TableName) -> Result<()> {
        self.drop_table(to)?;
        update(
            self,
            format!(
                "CREATE TABLE {} AS SELECT * FROM {}",
                self.quote_table(to),
                self.quote_table(from)
            ),
        )?;
        self.drop_table(from)
    }

    fn insert_row(&self, table: &TableName, values: &[Value]) -> Result<()> {
        let values: Vec<String> = values.iter().map(Value::to_sql_literal).collect();
        update(
            self,
            format!(
                "INSERT INTO {} VALUES ({})",
                self.quote_table(table),
                values.join(", ")
            ),
        )
    }

    fn delete_rows(&self, table: &TableName, condition: &Expr) -> Result<()> {
        update(
            self,
            format!("DELETE FROM {} WHERE {}", self.quote_table(table), condition),
        )
    }
}

/// The information-schema query the default `get_columns` issues.
pub fn columns_query(table: &TableName) -> String {
    let mut sql = format!(
        "SELECT column_name, data_type FROM information_schema.columns WHERE table_name = {}",
        Value::string(table.table.clone()).to_sql_literal()
    );
    if let Some(schema) = &table.schema {
        sql.push_str(&format!(
            " AND table_schema = {}",
            Value::string(schema.clone()).to_sql_literal()
        ));
    }
    sql.push_str(" ORDER BY ordinal_position");
    sql
}

fn update<D: Dbms + ?Sized>(dbms: &D, sql: String) -> Result<()> {
    log::trace!("{}", sql);
    dbms.execute_update(&sql)
}

fn query<D: Dbms + ?Sized>(dbms: &D, sql: String) -> Result<QueryResult> {
    log::trace!("{}", sql);
    dbms.execute(&sql)
}
