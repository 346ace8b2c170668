//! Planner type definitions
//!
//! Logical plan, physical plan and expression trees. All of them are closed
//! enums; every consumer matches them exhaustively.

use crate::batch::ScalarValue;
use crate::catalog::TableSource;
use crate::sql::planner::schema::{Column, PlanSchemaRef};
use arrow::datatypes::{DataType, SchemaRef};
use std::fmt;
use std::sync::Arc;

/// Logical plan: schema-aware description of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Read a catalog table
    Scan {
        table: TableRef,
        /// Relation name columns are qualified with (alias or table name)
        qualifier: String,
        /// Indices into the source schema; `None` reads every column
        projection: Option<Vec<usize>>,
        /// Conjuncts applied to every scanned row
        filters: Vec<Expr>,
        schema: PlanSchemaRef,
    },
    /// Compute output columns
    Project {
        input: Box<LogicalPlan>,
        exprs: Vec<Expr>,
        schema: PlanSchemaRef,
    },
    /// WHERE / HAVING
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    /// GROUP BY + aggregates; output is the group columns followed by the aggregates
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        schema: PlanSchemaRef,
    },
    /// JOIN; `on` holds equi-key pairs (left expr, right expr)
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        on: Vec<(Expr, Expr)>,
        /// Non-equi remainder of the join condition, over the joined schema
        filter: Option<Expr>,
        schema: PlanSchemaRef,
    },
    /// ORDER BY
    Sort {
        input: Box<LogicalPlan>,
        order_by: Vec<SortExpr>,
    },
    /// LIMIT / OFFSET
    Limit {
        input: Box<LogicalPlan>,
        skip: usize,
        fetch: Option<usize>,
    },
    /// `(subquery) AS alias`
    SubqueryAlias {
        input: Box<LogicalPlan>,
        alias: String,
        schema: PlanSchemaRef,
    },
    /// No input table: one row for `SELECT <exprs>`, zero rows for a
    /// predicate folded to false
    EmptyRelation {
        produce_one_row: bool,
        schema: PlanSchemaRef,
    },
}

impl LogicalPlan {
    /// Resolved output schema of this node.
    pub fn schema(&self) -> &PlanSchemaRef {
        match self {
            LogicalPlan::Scan { schema, .. }
            | LogicalPlan::Project { schema, .. }
            | LogicalPlan::Aggregate { schema, .. }
            | LogicalPlan::Join { schema, .. }
            | LogicalPlan::SubqueryAlias { schema, .. }
            | LogicalPlan::EmptyRelation { schema, .. } => schema,
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. } => input.schema(),
        }
    }

    pub fn inputs(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } | LogicalPlan::EmptyRelation { .. } => vec![],
            LogicalPlan::Project { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::SubqueryAlias { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    /// Indented tree rendering used by `EXPLAIN`-style output.
    pub fn display_indent(&self) -> String {
        let mut out = String::new();
        self.fmt_indent(&mut out, 0);
        out
    }

    fn fmt_indent(&self, out: &mut String, depth: usize) {
        use std::fmt::Write;
        let pad = "  ".repeat(depth);
        let _ = match self {
            LogicalPlan::Scan {
                table,
                qualifier,
                projection,
                filters,
                schema,
            } => {
                let alias = if qualifier != &table.name {
                    format!(" AS {qualifier}")
                } else {
                    String::new()
                };
                let mut line = format!("{pad}Scan: {}{alias}", table.name);
                if projection.is_some() {
                    let cols: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
                    line.push_str(&format!(" projection=[{}]", cols.join(", ")));
                }
                if !filters.is_empty() {
                    line.push_str(&format!(" filters=[{}]", join_exprs(filters)));
                }
                writeln!(out, "{line}")
            }
            LogicalPlan::Project { exprs, .. } => {
                writeln!(out, "{pad}Projection: {}", join_exprs(exprs))
            }
            LogicalPlan::Filter { predicate, .. } => writeln!(out, "{pad}Filter: {predicate}"),
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                ..
            } => writeln!(
                out,
                "{pad}Aggregate: groupBy=[{}], aggr=[{}]",
                join_exprs(group_by),
                join_exprs(aggregates)
            ),
            LogicalPlan::Join {
                join_type,
                on,
                filter,
                ..
            } => {
                let keys: Vec<String> = on.iter().map(|(l, r)| format!("{l} = {r}")).collect();
                let mut line = if keys.is_empty() && filter.is_none() {
                    format!("{pad}CrossJoin:")
                } else {
                    format!("{pad}{join_type} Join: on=[{}]", keys.join(", "))
                };
                if let Some(filter) = filter {
                    line.push_str(&format!(" filter={filter}"));
                }
                writeln!(out, "{line}")
            }
            LogicalPlan::Sort { order_by, .. } => {
                let keys: Vec<String> = order_by.iter().map(ToString::to_string).collect();
                writeln!(out, "{pad}Sort: {}", keys.join(", "))
            }
            LogicalPlan::Limit { skip, fetch, .. } => match fetch {
                Some(fetch) => writeln!(out, "{pad}Limit: skip={skip}, fetch={fetch}"),
                None => writeln!(out, "{pad}Limit: skip={skip}, fetch=None"),
            },
            LogicalPlan::SubqueryAlias { alias, .. } => {
                writeln!(out, "{pad}SubqueryAlias: {alias}")
            }
            LogicalPlan::EmptyRelation {
                produce_one_row, ..
            } => writeln!(out, "{pad}EmptyRelation: rows={}", u8::from(*produce_one_row)),
        };
        for input in self.inputs() {
            input.fmt_indent(out, depth + 1);
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_indent())
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A catalog table captured at planning time.
///
/// Holding the source itself (not just its name) keeps a DataFrame bound to
/// the catalog snapshot it was planned against.
#[derive(Clone)]
pub struct TableRef {
    pub name: String,
    pub source: Arc<dyn TableSource>,
}

impl PartialEq for TableRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.source, &other.source)
    }
}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableRef({})", self.name)
    }
}

/// Expression: columns, literals, operators, function calls
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Resolved column reference
    Column(Column),
    Literal(ScalarValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// Logical NOT
    Not(Box<Expr>),
    /// Unary minus
    Negative(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },
    /// Row-wise function call (UPPER, ABS, ...)
    ScalarFunction {
        func: ScalarFunction,
        args: Vec<Expr>,
    },
    /// Aggregate call; `arg` is `None` for `COUNT(*)`. Only valid in an Aggregate node.
    Aggregate {
        func: AggregateFunction,
        arg: Option<Box<Expr>>,
    },
    /// `expr AS name`
    Alias { expr: Box<Expr>, name: String },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) => write!(f, "{col}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::BinaryOp { left, op, right } => write!(f, "{left} {op} {right}"),
            Expr::Not(expr) => write!(f, "NOT {expr}"),
            Expr::Negative(expr) => write!(f, "(- {expr})"),
            Expr::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Expr::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
            Expr::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type:?})"),
            Expr::ScalarFunction { func, args } => {
                write!(f, "{func}({})", join_exprs(args))
            }
            Expr::Aggregate { func, arg } => match arg {
                Some(arg) => write!(f, "{func}({arg})"),
                None => write!(f, "{func}(*)"),
            },
            Expr::Alias { expr, name } => write!(f, "{expr} AS {name}"),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    // comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // logical
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Multiply | Self::Divide | Self::Modulo
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        };
        f.write_str(symbol)
    }
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" | "mean" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar (row-wise) function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    // string
    Upper,
    Lower,
    Length,
    Trim,
    Concat,

    // math
    Abs,
    Round,
    Ceil,
    Floor,
    Sqrt,
}

impl ScalarFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            "length" | "char_length" | "character_length" => Some(Self::Length),
            "trim" | "btrim" => Some(Self::Trim),
            "concat" => Some(Self::Concat),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "ceil" | "ceiling" => Some(Self::Ceil),
            "floor" => Some(Self::Floor),
            "sqrt" => Some(Self::Sqrt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Length => "length",
            Self::Trim => "trim",
            Self::Concat => "concat",
            Self::Abs => "abs",
            Self::Round => "round",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Sqrt => "sqrt",
        }
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// JOIN type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    /// Whether unmatched left rows are emitted null-padded.
    pub fn preserves_left(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    /// Whether unmatched right rows are emitted null-padded.
    pub fn preserves_right(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inner => "Inner",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Full => "Full",
        };
        f.write_str(name)
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub asc: bool,
    pub nulls_first: bool,
}

impl fmt::Display for SortExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.asc { "ASC" } else { "DESC" };
        let nulls = if self.nulls_first {
            "NULLS FIRST"
        } else {
            "NULLS LAST"
        };
        write!(f, "{} {dir} {nulls}", self.expr)
    }
}

// ===== Physical Plan =====

/// Physical plan: index-resolved, algorithm-selected execution plan
#[derive(Debug, Clone)]
pub enum PhysicalPlan {
    TableScan {
        table: String,
        source: Arc<dyn TableSource>,
        projection: Option<Vec<usize>>,
        /// Advisory filters handed to the source
        filter_hint: Vec<Expr>,
        schema: SchemaRef,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: PhysicalExpr,
    },
    Projection {
        input: Box<PhysicalPlan>,
        exprs: Vec<PhysicalExpr>,
        schema: SchemaRef,
    },
    HashAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<PhysicalExpr>,
        aggregates: Vec<PhysicalAggExpr>,
        schema: SchemaRef,
    },
    /// Builds the right input into a hash table and streams the left input
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        on: Vec<(PhysicalExpr, PhysicalExpr)>,
        filter: Option<PhysicalExpr>,
        join_type: JoinType,
        schema: SchemaRef,
    },
    /// Sorts both inputs on the join keys and merges them
    SortMergeJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        on: Vec<(PhysicalExpr, PhysicalExpr)>,
        filter: Option<PhysicalExpr>,
        join_type: JoinType,
        schema: SchemaRef,
    },
    /// Joins without equi keys
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        filter: Option<PhysicalExpr>,
        join_type: JoinType,
        schema: SchemaRef,
    },
    /// Full sort; `fetch` keeps only the first rows (top-k)
    Sort {
        input: Box<PhysicalPlan>,
        order_by: Vec<PhysicalSortExpr>,
        fetch: Option<usize>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        skip: usize,
        fetch: Option<usize>,
    },
    Empty {
        produce_one_row: bool,
        schema: SchemaRef,
    },
}

impl PhysicalPlan {
    pub fn schema(&self) -> SchemaRef {
        match self {
            PhysicalPlan::TableScan { schema, .. }
            | PhysicalPlan::Projection { schema, .. }
            | PhysicalPlan::HashAggregate { schema, .. }
            | PhysicalPlan::HashJoin { schema, .. }
            | PhysicalPlan::SortMergeJoin { schema, .. }
            | PhysicalPlan::NestedLoopJoin { schema, .. }
            | PhysicalPlan::Empty { schema, .. } => Arc::clone(schema),
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => input.schema(),
        }
    }

    pub fn inputs(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::TableScan { .. } | PhysicalPlan::Empty { .. } => vec![],
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Projection { input, .. }
            | PhysicalPlan::HashAggregate { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => vec![input.as_ref()],
            PhysicalPlan::HashJoin { left, right, .. }
            | PhysicalPlan::SortMergeJoin { left, right, .. }
            | PhysicalPlan::NestedLoopJoin { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
        }
    }

    /// Returns a list of all tables read by this plan.
    pub fn tables(&self) -> Vec<String> {
        match self {
            PhysicalPlan::TableScan { table, .. } => vec![table.clone()],
            _ => self.inputs().into_iter().flat_map(|p| p.tables()).collect(),
        }
    }

    pub fn display_indent(&self) -> String {
        let mut out = String::new();
        self.fmt_indent(&mut out, 0);
        out
    }

    fn fmt_indent(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let line = match self {
            PhysicalPlan::TableScan {
                table, projection, ..
            } => match projection {
                Some(p) => format!("TableScanExec: {table} projection={p:?}"),
                None => format!("TableScanExec: {table}"),
            },
            PhysicalPlan::Filter { predicate, .. } => format!("FilterExec: {predicate}"),
            PhysicalPlan::Projection { exprs, schema, .. } => {
                let items: Vec<String> = exprs
                    .iter()
                    .zip(schema.fields())
                    .map(|(e, f)| format!("{e} as {}", f.name()))
                    .collect();
                format!("ProjectionExec: {}", items.join(", "))
            }
            PhysicalPlan::HashAggregate {
                group_by,
                aggregates,
                ..
            } => format!(
                "HashAggregateExec: groupBy={}, aggr={}",
                group_by.len(),
                aggregates.len()
            ),
            PhysicalPlan::HashJoin { join_type, on, .. } => {
                format!("HashJoinExec: type={join_type}, keys={}", on.len())
            }
            PhysicalPlan::SortMergeJoin { join_type, on, .. } => {
                format!("SortMergeJoinExec: type={join_type}, keys={}", on.len())
            }
            PhysicalPlan::NestedLoopJoin { join_type, .. } => {
                format!("NestedLoopJoinExec: type={join_type}")
            }
            PhysicalPlan::Sort {
                order_by, fetch, ..
            } => match fetch {
                Some(fetch) => format!("SortExec: keys={}, fetch={fetch}", order_by.len()),
                None => format!("SortExec: keys={}", order_by.len()),
            },
            PhysicalPlan::Limit { skip, fetch, .. } => {
                format!("LimitExec: skip={skip}, fetch={fetch:?}")
            }
            PhysicalPlan::Empty {
                produce_one_row, ..
            } => format!("EmptyExec: rows={}", u8::from(*produce_one_row)),
        };
        out.push_str(&pad);
        out.push_str(&line);
        out.push('\n');
        for input in self.inputs() {
            input.fmt_indent(out, depth + 1);
        }
    }
}

/// Physical expression: columns are resolved to input indices
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalExpr {
    Column(usize),
    Literal(ScalarValue),
    BinaryOp {
        left: Box<PhysicalExpr>,
        op: BinaryOperator,
        right: Box<PhysicalExpr>,
    },
    Not(Box<PhysicalExpr>),
    Negative(Box<PhysicalExpr>),
    IsNull(Box<PhysicalExpr>),
    IsNotNull(Box<PhysicalExpr>),
    Cast {
        expr: Box<PhysicalExpr>,
        data_type: DataType,
    },
    ScalarFunc {
        func: ScalarFunction,
        args: Vec<PhysicalExpr>,
    },
}

impl fmt::Display for PhysicalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalExpr::Column(idx) => write!(f, "#{idx}"),
            PhysicalExpr::Literal(value) => write!(f, "{value}"),
            PhysicalExpr::BinaryOp { left, op, right } => write!(f, "{left} {op} {right}"),
            PhysicalExpr::Not(expr) => write!(f, "NOT {expr}"),
            PhysicalExpr::Negative(expr) => write!(f, "(- {expr})"),
            PhysicalExpr::IsNull(expr) => write!(f, "{expr} IS NULL"),
            PhysicalExpr::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
            PhysicalExpr::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type:?})"),
            PhysicalExpr::ScalarFunc { func, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{func}({})", args.join(", "))
            }
        }
    }
}

/// Physical sort key
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalSortExpr {
    pub expr: PhysicalExpr,
    pub asc: bool,
    pub nulls_first: bool,
}

/// Physical aggregate call; `arg` is `None` for `COUNT(*)`
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalAggExpr {
    pub func: AggregateFunction,
    pub arg: Option<PhysicalExpr>,
    /// Output type of the accumulator
    pub data_type: DataType,
}
