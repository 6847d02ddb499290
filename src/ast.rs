//! The criteria expression tree.
//!
//! A criteria is a binary tree: leaves compare a single field against a
//! literal value, composites join two subtrees with `AND`/`OR`. The tree is
//! immutable in shape once built; only a leaf's literal value may be rebound
//! (see [`Criteria::set_value`]). Rendering to the canonical string form
//! lives here because equality and hashing are defined over that form.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Local, NaiveDateTime, NaiveTime};
use uuid::Uuid;

/// Datetime layout used everywhere a value is turned into text.
pub const DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Comparison operators a leaf criteria can carry.
///
/// The set is closed: every consumer matches exhaustively, so adding an
/// operator forces the comparison and null-policy tables to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equals,
    GreaterThan,
    LessThan,
    NotEquals,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Like,
    NotLike,
    Is,
    IsNot,
}

impl ComparisonOp {
    /// `IS`/`IS NOT` render their operand inline (`IS NULL` does not accept
    /// a bound parameter); everything else goes through the parameter sink.
    pub fn can_be_parametrized(self) -> bool {
        match self {
            ComparisonOp::Is | ComparisonOp::IsNot => false,
            ComparisonOp::Equals
            | ComparisonOp::GreaterThan
            | ComparisonOp::LessThan
            | ComparisonOp::NotEquals
            | ComparisonOp::LessThanOrEqual
            | ComparisonOp::GreaterThanOrEqual
            | ComparisonOp::Like
            | ComparisonOp::NotLike => true,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOp::Equals => "=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::LessThan => "<",
            ComparisonOp::NotEquals => "<>",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThanOrEqual => ">=",
            ComparisonOp::Like => "LIKE",
            ComparisonOp::NotLike => "NOT LIKE",
            ComparisonOp::Is => "IS",
            ComparisonOp::IsNot => "IS NOT",
        };
        f.write_str(symbol)
    }
}

/// Logical connectives for composite criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        })
    }
}

/// A literal value carried by a leaf criteria.
///
/// `Today` and `Now` are symbolic: they stand for "the date/timestamp at the
/// moment this tree is evaluated or rendered", not the moment it was built.
/// A tree holding them can be reused across calls and always sees a fresh
/// timestamp; [`CriteriaValue::resolve`] performs the substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum CriteriaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Str(String),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Today,
    Now,
}

impl CriteriaValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CriteriaValue::Null)
    }

    /// Substitute the symbolic date/time sentinels with concrete values.
    /// Everything else passes through unchanged.
    pub fn resolve(&self) -> CriteriaValue {
        match self {
            CriteriaValue::Today => {
                CriteriaValue::DateTime(Local::now().date_naive().and_time(NaiveTime::MIN))
            }
            CriteriaValue::Now => CriteriaValue::DateTime(Local::now().naive_local()),
            other => other.clone(),
        }
    }

    /// Short type tag used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            CriteriaValue::Null => "null",
            CriteriaValue::Bool(_) => "bool",
            CriteriaValue::Integer(_) => "integer",
            CriteriaValue::Decimal(_) => "decimal",
            CriteriaValue::Str(_) => "string",
            CriteriaValue::DateTime(_) => "datetime",
            CriteriaValue::Guid(_) => "guid",
            CriteriaValue::Today => "today",
            CriteriaValue::Now => "now",
        }
    }
}

impl fmt::Display for CriteriaValue {
    /// The unquoted literal text. Datetimes use [`DATETIME_FORMAT`], GUIDs
    /// the braced form, and the sentinels their symbolic names so that the
    /// canonical string of a reused tree stays stable over time.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriteriaValue::Null => f.write_str("NULL"),
            CriteriaValue::Bool(b) => write!(f, "{}", b),
            CriteriaValue::Integer(i) => write!(f, "{}", i),
            CriteriaValue::Decimal(d) => write!(f, "{}", d),
            CriteriaValue::Str(s) => f.write_str(s),
            CriteriaValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            CriteriaValue::Guid(u) => write!(f, "{}", u.braced()),
            CriteriaValue::Today => f.write_str("Today"),
            CriteriaValue::Now => f.write_str("Now"),
        }
    }
}

impl From<&str> for CriteriaValue {
    fn from(s: &str) -> Self {
        CriteriaValue::Str(s.to_string())
    }
}

impl From<String> for CriteriaValue {
    fn from(s: String) -> Self {
        CriteriaValue::Str(s)
    }
}

impl From<i64> for CriteriaValue {
    fn from(i: i64) -> Self {
        CriteriaValue::Integer(i)
    }
}

impl From<i32> for CriteriaValue {
    fn from(i: i32) -> Self {
        CriteriaValue::Integer(i64::from(i))
    }
}

impl From<f64> for CriteriaValue {
    fn from(d: f64) -> Self {
        CriteriaValue::Decimal(d)
    }
}

impl From<bool> for CriteriaValue {
    fn from(b: bool) -> Self {
        CriteriaValue::Bool(b)
    }
}

impl From<NaiveDateTime> for CriteriaValue {
    fn from(dt: NaiveDateTime) -> Self {
        CriteriaValue::DateTime(dt)
    }
}

impl From<Uuid> for CriteriaValue {
    fn from(u: Uuid) -> Self {
        CriteriaValue::Guid(u)
    }
}

/// One link in a join path: a relationship name and the table it resolves to.
///
/// `entity_name` defaults to the relationship name until a mapping config
/// rewrites it. A dotted path like `Father.Mother` becomes a chain of links;
/// the deepest link owns the column being compared.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub entity_name: String,
    pub child: Option<Box<Source>>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Source { entity_name: name.clone(), name, child: None }
    }

    /// Build a chain from path segments. Empty input yields no source.
    pub fn from_segments(segments: &[&str]) -> Option<Source> {
        let (first, rest) = segments.split_first()?;
        let mut source = Source::new(*first);
        source.child = Source::from_segments(rest).map(Box::new);
        Some(source)
    }

    /// The deepest link in the chain: the one whose table owns the column.
    pub fn resolved_link(&self) -> &Source {
        match &self.child {
            Some(child) => child.resolved_link(),
            None => self,
        }
    }

    pub fn resolved_entity(&self) -> &str {
        &self.resolved_link().entity_name
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(child) = &self.child {
            write!(f, ".{}", child)?;
        }
        Ok(())
    }
}

/// A reference to a property, optionally qualified by a join path.
///
/// `field_name` is the datasource column and may differ from the property
/// name once a mapping config has resolved the field.
#[derive(Debug, Clone)]
pub struct QueryField {
    pub property_name: String,
    pub field_name: String,
    pub source: Option<Source>,
}

impl QueryField {
    pub fn new(
        property_name: impl Into<String>,
        field_name: impl Into<String>,
        source: Option<Source>,
    ) -> Self {
        QueryField {
            property_name: property_name.into(),
            field_name: field_name.into(),
            source,
        }
    }

    /// Build a field from a dotted path: the last segment is the property
    /// (and default column), the leading segments form the source chain.
    /// A dot-free path yields an unqualified field.
    pub fn from_path(path: &str) -> Self {
        let segments: Vec<&str> = path.split('.').collect();
        let (property, prefix) = match segments.split_last() {
            Some((last, rest)) => (*last, rest),
            None => (path, &[][..]),
        };
        QueryField {
            property_name: property.to_string(),
            field_name: property.to_string(),
            source: Source::from_segments(prefix),
        }
    }
}

/// The criteria tree itself. Exactly two shapes, enforced by construction:
/// a leaf carries field/operator/value, a composite carries left/op/right.
#[derive(Debug, Clone)]
pub enum Criteria {
    Leaf {
        field: QueryField,
        op: ComparisonOp,
        value: CriteriaValue,
    },
    Composite {
        left: Box<Criteria>,
        op: LogicalOp,
        right: Box<Criteria>,
    },
}

impl Criteria {
    pub fn leaf(field: QueryField, op: ComparisonOp, value: impl Into<CriteriaValue>) -> Self {
        Criteria::Leaf { field, op, value: value.into() }
    }

    /// Leaf from a dotted property path, without going through a resolver.
    pub fn prop(path: &str, op: ComparisonOp, value: impl Into<CriteriaValue>) -> Self {
        Criteria::leaf(QueryField::from_path(path), op, value)
    }

    pub fn composite(left: Criteria, op: LogicalOp, right: Criteria) -> Self {
        Criteria::Composite { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Criteria::Composite { .. })
    }

    pub fn field(&self) -> Option<&QueryField> {
        match self {
            Criteria::Leaf { field, .. } => Some(field),
            Criteria::Composite { .. } => None,
        }
    }

    pub fn comparison_op(&self) -> Option<ComparisonOp> {
        match self {
            Criteria::Leaf { op, .. } => Some(*op),
            Criteria::Composite { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&CriteriaValue> {
        match self {
            Criteria::Leaf { value, .. } => Some(value),
            Criteria::Composite { .. } => None,
        }
    }

    pub fn left(&self) -> Option<&Criteria> {
        match self {
            Criteria::Composite { left, .. } => Some(left),
            Criteria::Leaf { .. } => None,
        }
    }

    pub fn right(&self) -> Option<&Criteria> {
        match self {
            Criteria::Composite { right, .. } => Some(right),
            Criteria::Leaf { .. } => None,
        }
    }

    pub fn logical_op(&self) -> Option<LogicalOp> {
        match self {
            Criteria::Composite { op, .. } => Some(*op),
            Criteria::Leaf { .. } => None,
        }
    }

    /// True unless the leaf operator is `IS`/`IS NOT`. Composites always
    /// parametrize their leaves individually.
    pub fn can_be_parametrized(&self) -> bool {
        match self {
            Criteria::Leaf { op, .. } => op.can_be_parametrized(),
            Criteria::Composite { .. } => true,
        }
    }

    /// Rebind a leaf's literal so the same shaped tree can be re-run with a
    /// new value. No-op on composites. Callers must serialize rebinds
    /// against in-flight traversals; the tree holds no lock.
    pub fn set_value(&mut self, value: impl Into<CriteriaValue>) {
        if let Criteria::Leaf { value: slot, .. } = self {
            *slot = value.into();
        }
    }

    /// Null-safe `AND` merge: an absent side yields the other unchanged.
    /// Callers routinely combine an optional user filter with a mandatory
    /// key filter and must not fail when either is missing.
    pub fn merge_with_and(a: Option<Criteria>, b: Option<Criteria>) -> Option<Criteria> {
        match (a, b) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(Criteria::composite(a, LogicalOp::And, b)),
        }
    }

    /// "Match this key" as criteria: `Equals` leaves joined left-deep with
    /// `AND`. A single pair stays a bare leaf; downstream string comparisons
    /// rely on that shape.
    pub fn from_key_values<I, N, V>(pairs: I) -> Option<Criteria>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<CriteriaValue>,
    {
        let mut merged = None;
        for (name, value) in pairs {
            let leaf = Criteria::prop(name.as_ref(), ComparisonOp::Equals, value);
            merged = Criteria::merge_with_and(merged, Some(leaf));
        }
        merged
    }

    /// The one tree walk both renderers share: `leaf` turns a leaf into a
    /// result, `join` combines two subtree results under a logical operator.
    pub fn fold<T>(
        &self,
        leaf: &mut dyn FnMut(&QueryField, ComparisonOp, &CriteriaValue) -> T,
        join: &mut dyn FnMut(T, LogicalOp, T) -> T,
    ) -> T {
        match self {
            Criteria::Leaf { field, op, value } => leaf(field, *op, value),
            Criteria::Composite { left, op, right } => {
                let l = left.fold(leaf, join);
                let r = right.fold(leaf, join);
                join(l, *op, r)
            }
        }
    }
}

impl fmt::Display for Criteria {
    /// Canonical form: composite `"(<l>) <AND|OR> (<r>)"`, leaf
    /// `"<source.><property> <op> <literal>"`. `IS`/`IS NOT` literals are
    /// rendered unquoted and upper-cased (they denote keywords like `NULL`),
    /// all other literals are single-quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.fold(
            &mut |field, op, value| {
                let prefix = match &field.source {
                    Some(source) => format!("{}.", source),
                    None => String::new(),
                };
                let literal = match op {
                    ComparisonOp::Is | ComparisonOp::IsNot => value.to_string().to_uppercase(),
                    _ => format!("'{}'", value),
                };
                format!("{}{} {} {}", prefix, field.property_name, op, literal)
            },
            &mut |l, op, r| format!("({}) {} ({})", l, op, r),
        );
        f.write_str(&rendered)
    }
}

// Equality and hashing are defined over the canonical string: two trees are
// equal iff they render identically. Rendering changes are equality changes.
impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Criteria {}

impl Hash for Criteria {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(criteria: &Criteria) -> u64 {
        let mut hasher = DefaultHasher::new();
        criteria.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_leaf_shape() {
        let leaf = Criteria::prop("Surname", ComparisonOp::Equals, "Smith");
        assert!(!leaf.is_composite());
        assert_eq!(leaf.field().unwrap().property_name, "Surname");
        assert_eq!(leaf.comparison_op(), Some(ComparisonOp::Equals));
        assert!(leaf.left().is_none());
        assert!(leaf.right().is_none());
        assert!(leaf.logical_op().is_none());
    }

    #[test]
    fn test_composite_shape() {
        let composite = Criteria::composite(
            Criteria::prop("Surname", ComparisonOp::Equals, "Smith"),
            LogicalOp::Or,
            Criteria::prop("Age", ComparisonOp::GreaterThan, 18),
        );
        assert!(composite.is_composite());
        assert_eq!(composite.logical_op(), Some(LogicalOp::Or));
        assert!(composite.field().is_none());
        assert!(composite.value().is_none());
        assert!(!composite.left().unwrap().is_composite());
        assert!(!composite.right().unwrap().is_composite());
    }

    #[test]
    fn test_merge_with_and_identities() {
        assert_eq!(Criteria::merge_with_and(None, None), None);

        let x = Criteria::prop("A", ComparisonOp::Equals, 1);
        let y = Criteria::prop("B", ComparisonOp::Equals, 2);
        assert_eq!(Criteria::merge_with_and(Some(x.clone()), None), Some(x.clone()));
        assert_eq!(Criteria::merge_with_and(None, Some(y.clone())), Some(y.clone()));

        let merged = Criteria::merge_with_and(Some(x.clone()), Some(y.clone())).unwrap();
        assert!(merged.is_composite());
        assert_eq!(merged.logical_op(), Some(LogicalOp::And));
        assert_eq!(merged.left(), Some(&x));
        assert_eq!(merged.right(), Some(&y));
    }

    #[test]
    fn test_from_key_values_single_is_leaf() {
        let criteria = Criteria::from_key_values([("PersonID", 7)]).unwrap();
        assert!(!criteria.is_composite());
        assert_eq!(criteria.to_string(), "PersonID = '7'");
    }

    #[test]
    fn test_from_key_values_multi_is_left_deep_chain() {
        let criteria = Criteria::from_key_values([("A", 1), ("B", 2), ("C", 3)]).unwrap();
        assert_eq!(criteria.to_string(), "((A = '1') AND (B = '2')) AND (C = '3')");
        // left side is itself composite, right side is the last leaf
        assert!(criteria.left().unwrap().is_composite());
        assert!(!criteria.right().unwrap().is_composite());
    }

    #[test]
    fn test_from_key_values_empty() {
        let pairs: Vec<(&str, i64)> = Vec::new();
        assert_eq!(Criteria::from_key_values(pairs), None);
    }

    #[test]
    fn test_canonical_string_end_to_end() {
        let criteria = Criteria::merge_with_and(
            Some(Criteria::prop("Surname", ComparisonOp::Equals, "Smith")),
            Some(Criteria::prop("Age", ComparisonOp::GreaterThanOrEqual, 18)),
        )
        .unwrap();
        assert_eq!(criteria.to_string(), "(Surname = 'Smith') AND (Age >= '18')");
    }

    #[test]
    fn test_source_prefix_in_canonical_string() {
        let criteria = Criteria::prop("Father.Surname", ComparisonOp::Equals, "Smith");
        assert_eq!(criteria.to_string(), "Father.Surname = 'Smith'");

        let nested = Criteria::prop("Father.Mother.Surname", ComparisonOp::Equals, "Smith");
        assert_eq!(nested.to_string(), "Father.Mother.Surname = 'Smith'");
        let source = nested.field().unwrap().source.as_ref().unwrap();
        assert_eq!(source.resolved_link().name, "Mother");
    }

    #[test]
    fn test_is_renders_unquoted_uppercase() {
        let criteria = Criteria::prop("Surname", ComparisonOp::Is, CriteriaValue::Null);
        assert_eq!(criteria.to_string(), "Surname IS NULL");

        let keyword = Criteria::prop("Surname", ComparisonOp::IsNot, "null");
        assert_eq!(keyword.to_string(), "Surname IS NOT NULL");
    }

    #[test]
    fn test_datetime_and_guid_literal_forms() {
        let dt = NaiveDateTime::parse_from_str("2020/06/15 13:45:59", DATETIME_FORMAT).unwrap();
        let criteria = Criteria::prop("DateOfBirth", ComparisonOp::LessThan, dt);
        assert_eq!(criteria.to_string(), "DateOfBirth < '2020/06/15 13:45:59'");

        let id = Uuid::parse_str("12345678-1234-1234-1234-123456789012").unwrap();
        let by_id = Criteria::prop("PersonID", ComparisonOp::Equals, id);
        assert_eq!(
            by_id.to_string(),
            "PersonID = '{12345678-1234-1234-1234-123456789012}'"
        );
    }

    #[test]
    fn test_sentinels_render_symbolically() {
        let criteria = Criteria::prop("DateOfBirth", ComparisonOp::LessThan, CriteriaValue::Today);
        assert_eq!(criteria.to_string(), "DateOfBirth < 'Today'");
    }

    #[test]
    fn test_resolve_substitutes_sentinels() {
        assert!(matches!(CriteriaValue::Today.resolve(), CriteriaValue::DateTime(_)));
        assert!(matches!(CriteriaValue::Now.resolve(), CriteriaValue::DateTime(_)));
        // concrete values pass through
        assert_eq!(CriteriaValue::Integer(5).resolve(), CriteriaValue::Integer(5));
    }

    #[test]
    fn test_equality_is_string_form() {
        let a = Criteria::composite(
            Criteria::prop("Surname", ComparisonOp::Equals, "Smith"),
            LogicalOp::And,
            Criteria::prop("Age", ComparisonOp::GreaterThanOrEqual, 18),
        );
        let b = Criteria::composite(
            Criteria::prop("Surname", ComparisonOp::Equals, "Smith"),
            LogicalOp::And,
            Criteria::prop("Age", ComparisonOp::GreaterThanOrEqual, 18),
        );
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let mut c = b.clone();
        if let Criteria::Composite { right, .. } = &mut c {
            right.set_value(21);
        }
        assert_ne!(a, c);
    }

    #[test]
    fn test_set_value_rebinds_leaf_only() {
        let mut leaf = Criteria::prop("Age", ComparisonOp::Equals, 18);
        leaf.set_value(21);
        assert_eq!(leaf.value(), Some(&CriteriaValue::Integer(21)));

        let mut composite = Criteria::composite(
            Criteria::prop("A", ComparisonOp::Equals, 1),
            LogicalOp::And,
            Criteria::prop("B", ComparisonOp::Equals, 2),
        );
        let before = composite.to_string();
        composite.set_value(99);
        assert_eq!(composite.to_string(), before);
    }

    #[test]
    fn test_can_be_parametrized() {
        assert!(ComparisonOp::Equals.can_be_parametrized());
        assert!(ComparisonOp::Like.can_be_parametrized());
        assert!(!ComparisonOp::Is.can_be_parametrized());
        assert!(!ComparisonOp::IsNot.can_be_parametrized());
        assert!(Criteria::prop("A", ComparisonOp::NotLike, "x%").can_be_parametrized());
        assert!(!Criteria::prop("A", ComparisonOp::Is, CriteriaValue::Null).can_be_parametrized());
    }

    #[test]
    fn test_from_path_unqualified() {
        let field = QueryField::from_path("Surname");
        assert_eq!(field.property_name, "Surname");
        assert_eq!(field.field_name, "Surname");
        assert!(field.source.is_none());
    }
}
