//! SQL materialization for criteria trees.
//!
//! Two paths share the tree walk. The fragment renderer turns a criteria
//! into a parameterized boolean expression through a pluggable identifier
//! formatter and parameter sink; literal values never appear inline except
//! for `IS [NOT] NULL`, which takes no bound parameter. The statement
//! compiler builds a complete `SELECT` via sea-query, with joins derived
//! from the criteria's source chains and an OR-to-IN collapse for long
//! equality chains on one field.

use std::collections::HashMap;

use sea_query::{
    Asterisk, Expr, Iden, JoinType, Keyword, PostgresQueryBuilder, SelectStatement, SimpleExpr,
    Value,
};

use crate::ast::{ComparisonOp, Criteria, CriteriaValue, LogicalOp, QueryField, Source,
    DATETIME_FORMAT};

/// Dialect-specific identifier quoting for the fragment renderer.
pub trait SqlFormatter {
    fn delimit_table(&self, name: &str) -> String;
    fn delimit_field(&self, name: &str) -> String;
}

/// Double-quote delimiting, as used by PostgreSQL (and ANSI SQL).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresFormatter;

impl SqlFormatter for PostgresFormatter {
    fn delimit_table(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }

    fn delimit_field(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }
}

/// Backtick delimiting, as used by MySQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlFormatter;

impl SqlFormatter for MySqlFormatter {
    fn delimit_table(&self, name: &str) -> String {
        format!("`{}`", name)
    }

    fn delimit_field(&self, name: &str) -> String {
        format!("`{}`", name)
    }
}

/// Registers literal values for later binding and hands back the
/// placeholder text to splice into the SQL. Keeping literals out of the
/// generated text is what makes the fragment renderer injection-safe.
pub trait ParameterSink {
    fn add_parameter(&mut self, value: CriteriaValue) -> String;
}

/// The stock sink: `@p0`, `@p1`, ... with values retained in order.
#[derive(Debug, Default)]
pub struct ParameterCollector {
    parameters: Vec<CriteriaValue>,
}

impl ParameterCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(&self) -> &[CriteriaValue] {
        &self.parameters
    }
}

impl ParameterSink for ParameterCollector {
    fn add_parameter(&mut self, value: CriteriaValue) -> String {
        let token = format!("@p{}", self.parameters.len());
        self.parameters.push(value);
        token
    }
}

impl Criteria {
    /// Render this criteria as a parameterized SQL boolean expression.
    ///
    /// Composites keep the canonical bracketed shape. Parametrizable leaves
    /// resolve their sentinels to concrete timestamps, push the value into
    /// the sink and emit its placeholder; `IS`/`IS NOT` leaves render their
    /// keyword operand inline. Never fails for a well-formed tree; null
    /// semantics are the database's concern here.
    pub fn to_sql(&self, formatter: &dyn SqlFormatter, sink: &mut dyn ParameterSink) -> String {
        self.fold(
            &mut |field, op, value| {
                let column = delimited_field(field, formatter);
                let operand = if op.can_be_parametrized() {
                    sink.add_parameter(value.resolve())
                } else {
                    value.to_string().to_uppercase()
                };
                format!("{} {} {}", column, op, operand)
            },
            &mut |left, op, right| format!("({}) {} ({})", left, op, right),
        )
    }
}

fn delimited_field(field: &QueryField, formatter: &dyn SqlFormatter) -> String {
    match &field.source {
        Some(source) => format!(
            "{}.{}",
            formatter.delimit_table(source.resolved_entity()),
            formatter.delimit_field(&field.field_name)
        ),
        None => formatter.delimit_field(&field.field_name),
    }
}

/// Table identifier wrapper for sea-query.
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier wrapper for sea-query.
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Configuration for statement compilation.
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Minimum number of OR'ed equality leaves before collapsing to IN.
    pub max_or_conditions_for_in: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self { max_or_conditions_for_in: 5 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Maps entity names to table names for schema resolution.
    pub table_mapping: HashMap<String, String>,
    pub optimization: OptimizationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompileError {}

/// An optimization applied during compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { field: String, value_count: usize },
}

/// Result of statement compilation with optimization information.
#[derive(Debug)]
pub struct CompileResult {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

/// Compiles an entity name plus optional criteria into a complete SELECT.
#[derive(Debug, Default)]
pub struct SqlCompiler {
    config: CompilerConfig,
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// The actual table name for an entity, falling back to lowercase.
    fn table_for(&self, entity: &str) -> String {
        self.config
            .table_mapping
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.to_lowercase())
    }

    /// Compile `SELECT * FROM <entity's table> [joins] [WHERE criteria]`.
    ///
    /// Each distinct source chain contributes one inner join against the
    /// chain's deepest table, on the `<relationship>_id = id` convention.
    pub fn compile(
        &self,
        entity: &str,
        criteria: Option<&Criteria>,
    ) -> Result<CompileResult, CompileError> {
        let mut optimizations = Vec::new();
        let base = TableName(self.table_for(entity));

        let mut select = SelectStatement::new();
        select.from(base.clone());
        select.column(Asterisk);

        if let Some(criteria) = criteria {
            let mut sources = Vec::new();
            collect_sources(criteria, &mut sources);
            for source in sources {
                let link = source.resolved_link();
                let target = TableName(self.table_for(&link.entity_name));
                select.join(
                    JoinType::InnerJoin,
                    target.clone(),
                    Expr::col((base.clone(), ColumnName(format!("{}_id", link.name.to_lowercase()))))
                        .equals((target, ColumnName("id".to_string()))),
                );
            }

            let (condition, mut opts) = self.compile_criteria(criteria)?;
            optimizations.append(&mut opts);
            select.and_where(condition);
        }

        Ok(CompileResult {
            sql: select.to_string(PostgresQueryBuilder),
            optimizations,
        })
    }

    fn compile_criteria(
        &self,
        criteria: &Criteria,
    ) -> Result<(SimpleExpr, Vec<Optimization>), CompileError> {
        match criteria {
            Criteria::Composite { left, op, right } => {
                if *op == LogicalOp::Or {
                    if let Some((expr, optimization)) = self.try_or_to_in(criteria) {
                        return Ok((expr, vec![optimization]));
                    }
                }
                let (left_expr, mut left_opts) = self.compile_criteria(left)?;
                let (right_expr, mut right_opts) = self.compile_criteria(right)?;
                left_opts.append(&mut right_opts);
                let expr = match op {
                    LogicalOp::And => left_expr.and(right_expr),
                    LogicalOp::Or => left_expr.or(right_expr),
                };
                Ok((expr, left_opts))
            }
            Criteria::Leaf { field, op, value } => {
                Ok((self.compile_leaf(field, *op, value)?, Vec::new()))
            }
        }
    }

    fn compile_leaf(
        &self,
        field: &QueryField,
        op: ComparisonOp,
        value: &CriteriaValue,
    ) -> Result<SimpleExpr, CompileError> {
        let col = self.column_expr(field);
        let expr = match op {
            ComparisonOp::Equals => col.eq(operand(value)),
            ComparisonOp::NotEquals => col.ne(operand(value)),
            ComparisonOp::GreaterThan => col.gt(operand(value)),
            ComparisonOp::LessThan => col.lt(operand(value)),
            ComparisonOp::GreaterThanOrEqual => col.gte(operand(value)),
            ComparisonOp::LessThanOrEqual => col.lte(operand(value)),
            ComparisonOp::Like => col.like(value.to_string()),
            ComparisonOp::NotLike => col.not_like(value.to_string()),
            ComparisonOp::Is => {
                if !is_null_operand(value) {
                    return Err(CompileError::new(format!(
                        "IS comparison on '{}' requires a NULL operand",
                        field.property_name
                    )));
                }
                col.is_null()
            }
            ComparisonOp::IsNot => {
                if !is_null_operand(value) {
                    return Err(CompileError::new(format!(
                        "IS NOT comparison on '{}' requires a NULL operand",
                        field.property_name
                    )));
                }
                col.is_not_null()
            }
        };
        Ok(expr)
    }

    fn column_expr(&self, field: &QueryField) -> Expr {
        match &field.source {
            Some(source) => Expr::col((
                TableName(self.table_for(source.resolved_entity())),
                ColumnName(field.field_name.clone()),
            )),
            None => Expr::col(ColumnName(field.field_name.clone())),
        }
    }

    /// Collapse `f = a OR f = b OR ...` into `f IN (a, b, ...)` once the
    /// chain reaches the configured threshold. Sentinels and NULLs keep
    /// their plain comparisons.
    fn try_or_to_in(&self, criteria: &Criteria) -> Option<(SimpleExpr, Optimization)> {
        let mut field: Option<&QueryField> = None;
        let mut values: Vec<&CriteriaValue> = Vec::new();
        if !collect_or_equalities(criteria, &mut field, &mut values) {
            return None;
        }
        if values.len() < self.config.optimization.max_or_conditions_for_in {
            return None;
        }
        if values.iter().any(|v| {
            matches!(v, CriteriaValue::Null | CriteriaValue::Today | CriteriaValue::Now)
        }) {
            return None;
        }
        let field = field?;
        let expr = self
            .column_expr(field)
            .is_in(values.iter().map(|v| operand(v)));
        let optimization = Optimization::OrToIn {
            field: field.property_name.clone(),
            value_count: values.len(),
        };
        Some((expr, optimization))
    }
}

/// A criteria value as a sea-query operand. Sentinels become the SQL
/// keywords the dialect evaluates at execution time, so a reused tree is
/// always fresh on the database side too.
fn operand(value: &CriteriaValue) -> SimpleExpr {
    match value {
        CriteriaValue::Null => SimpleExpr::Keyword(Keyword::Null),
        CriteriaValue::Bool(b) => SimpleExpr::Value(Value::Bool(Some(*b))),
        CriteriaValue::Integer(i) => SimpleExpr::Value(Value::BigInt(Some(*i))),
        CriteriaValue::Decimal(d) => SimpleExpr::Value(Value::Double(Some(*d))),
        CriteriaValue::Str(s) => SimpleExpr::Value(Value::String(Some(Box::new(s.clone())))),
        CriteriaValue::DateTime(dt) => SimpleExpr::Value(Value::String(Some(Box::new(
            dt.format(DATETIME_FORMAT).to_string(),
        )))),
        CriteriaValue::Guid(u) => SimpleExpr::Value(Value::String(Some(Box::new(u.to_string())))),
        CriteriaValue::Today => SimpleExpr::Keyword(Keyword::CurrentDate),
        CriteriaValue::Now => SimpleExpr::Keyword(Keyword::CurrentTimestamp),
    }
}

fn is_null_operand(value: &CriteriaValue) -> bool {
    value.is_null() || value.to_string().eq_ignore_ascii_case("null")
}

/// Distinct source chains referenced by the criteria, in first-seen order.
fn collect_sources<'a>(criteria: &'a Criteria, out: &mut Vec<&'a Source>) {
    match criteria {
        Criteria::Leaf { field, .. } => {
            if let Some(source) = &field.source {
                if !out.iter().any(|seen| seen.to_string() == source.to_string()) {
                    out.push(source);
                }
            }
        }
        Criteria::Composite { left, right, .. } => {
            collect_sources(left, out);
            collect_sources(right, out);
        }
    }
}

/// Walks an OR chain collecting equality leaves on a single field.
/// Returns false as soon as the pattern breaks.
fn collect_or_equalities<'a>(
    criteria: &'a Criteria,
    field: &mut Option<&'a QueryField>,
    values: &mut Vec<&'a CriteriaValue>,
) -> bool {
    match criteria {
        Criteria::Composite { left, op: LogicalOp::Or, right } => {
            collect_or_equalities(left, field, values)
                && collect_or_equalities(right, field, values)
        }
        Criteria::Composite { .. } => false,
        Criteria::Leaf { field: leaf_field, op: ComparisonOp::Equals, value } => {
            match field {
                Some(seen) if field_key(seen) == field_key(leaf_field) => {}
                Some(_) => return false,
                None => *field = Some(leaf_field),
            }
            values.push(value);
            true
        }
        Criteria::Leaf { .. } => false,
    }
}

fn field_key(field: &QueryField) -> String {
    match &field.source {
        Some(source) => format!("{}.{}", source, field.property_name),
        None => field.property_name.clone(),
    }
}
