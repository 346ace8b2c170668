//! SQL 논리 플래너: AST → LogicalPlan
//!
//! Resolves tables against a catalog snapshot and columns against the schema
//! of each scope. Expressions are type-checked as they are built; operands of
//! differing numeric types are widened with explicit `Cast` nodes.

use crate::batch::ScalarValue;
use crate::catalog::CatalogSnapshot;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::expr::{is_numeric, is_string, split_conjunction, wider_numeric};
use crate::sql::planner::schema::{Column, PlanSchema, PlanSchemaRef};
use crate::sql::planner::types::*;
use arrow::compute::can_cast_types;
use arrow::datatypes::DataType;
use sqlparser::ast::{
    self as ast, BinaryOperator as SqlBinaryOp, CeilFloorKind, DateTimeField, Distinct,
    DuplicateTreatment, Expr as SqlExpr, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName, OrderByExpr, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator, Value,
};
use std::sync::Arc;
use tracing::debug;

/// SQL BinaryOperator → Logical BinaryOperator 변환
pub fn convert_binary_op(op: &SqlBinaryOp) -> FlintResult<BinaryOperator> {
    match op {
        SqlBinaryOp::Plus => Ok(BinaryOperator::Plus),
        SqlBinaryOp::Minus => Ok(BinaryOperator::Minus),
        SqlBinaryOp::Multiply => Ok(BinaryOperator::Multiply),
        SqlBinaryOp::Divide => Ok(BinaryOperator::Divide),
        SqlBinaryOp::Modulo => Ok(BinaryOperator::Modulo),
        SqlBinaryOp::Eq => Ok(BinaryOperator::Eq),
        SqlBinaryOp::NotEq => Ok(BinaryOperator::NotEq),
        SqlBinaryOp::Lt => Ok(BinaryOperator::Lt),
        SqlBinaryOp::LtEq => Ok(BinaryOperator::LtEq),
        SqlBinaryOp::Gt => Ok(BinaryOperator::Gt),
        SqlBinaryOp::GtEq => Ok(BinaryOperator::GtEq),
        SqlBinaryOp::And => Ok(BinaryOperator::And),
        SqlBinaryOp::Or => Ok(BinaryOperator::Or),
        _ => Err(FlintError::NotSupported(format!("binary operator {op}"))),
    }
}

/// Extract a usize from a SQL literal expression (for LIMIT/OFFSET).
pub fn extract_usize(expr: &SqlExpr) -> FlintResult<usize> {
    match expr {
        SqlExpr::Value(Value::Number(n, _)) => n.parse::<usize>().map_err(|_| {
            FlintError::Plan(format!(
                "LIMIT/OFFSET value must be a non-negative integer, got: {n}"
            ))
        }),
        _ => Err(FlintError::NotSupported(format!("non-literal LIMIT/OFFSET expression: {expr}"))),
    }
}

/// Map a SQL type name onto the Arrow type it is cast to.
pub fn convert_data_type(data_type: &ast::DataType) -> FlintResult<DataType> {
    let text = data_type.to_string().to_uppercase();
    let base = text.split('(').next().unwrap_or_default().trim();
    match base {
        "BOOL" | "BOOLEAN" => Ok(DataType::Boolean),
        "TINYINT" => Ok(DataType::Int8),
        "SMALLINT" | "INT2" => Ok(DataType::Int16),
        "INT" | "INTEGER" | "INT4" => Ok(DataType::Int32),
        "BIGINT" | "INT8" | "INT64" | "LONG" => Ok(DataType::Int64),
        "FLOAT" | "FLOAT4" | "FLOAT8" | "FLOAT64" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" => {
            Ok(DataType::Float64)
        }
        "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "TEXT" | "STRING" => {
            Ok(DataType::Utf8)
        }
        _ => Err(FlintError::NotSupported(format!("CAST to {data_type}"))),
    }
}

/// Unquoted identifiers are case-insensitive; quoted ones keep their spelling.
fn normalize_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// Name resolution context of one clause.
struct Scope<'a> {
    schema: &'a PlanSchema,
    /// Aliased select items; visible to GROUP BY, HAVING and ORDER BY
    aliases: &'a [Expr],
}

impl<'a> Scope<'a> {
    fn new(schema: &'a PlanSchema) -> Self {
        Self {
            schema,
            aliases: &[],
        }
    }

    fn with_aliases(schema: &'a PlanSchema, aliases: &'a [Expr]) -> Self {
        Self { schema, aliases }
    }
}

/// 논리 플랜 빌더: AST → LogicalPlan 변환
pub struct LogicalPlanner<'a> {
    catalog: &'a CatalogSnapshot,
}

impl<'a> LogicalPlanner<'a> {
    pub fn new(catalog: &'a CatalogSnapshot) -> Self {
        Self { catalog }
    }

    /// SQL Statement → LogicalPlan 변환
    pub fn plan(&self, statement: &Statement) -> FlintResult<LogicalPlan> {
        match statement {
            Statement::Query(query) => {
                let plan = self.plan_query(query)?;
                debug!(target: "flint::sql", plan = %plan.display_indent(), "logical plan");
                Ok(plan)
            }
            _ => Err(FlintError::NotSupported("only SELECT queries are supported".to_string())),
        }
    }

    fn plan_query(&self, query: &Query) -> FlintResult<LogicalPlan> {
        if query.with.is_some() {
            return Err(FlintError::NotSupported("WITH clause".to_string()));
        }
        if query.fetch.is_some() {
            return Err(FlintError::NotSupported("FETCH clause".to_string()));
        }
        let order_by: &[OrderByExpr] = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or(&[]);

        let plan = match query.body.as_ref() {
            SetExpr::Select(select) => self.plan_select(select, order_by)?,
            SetExpr::Query(inner) => {
                let plan = self.plan_query(inner)?;
                self.plan_sort_on_output(plan, order_by)?
            }
            SetExpr::SetOperation { op, .. } => {
                return Err(FlintError::NotSupported(format!("set operation {op}")));
            }
            other => return Err(FlintError::NotSupported(format!("query body {other}"))),
        };

        let skip = match &query.offset {
            Some(offset) => extract_usize(&offset.value)?,
            None => 0,
        };
        let fetch = query.limit.as_ref().map(extract_usize).transpose()?;
        if skip == 0 && fetch.is_none() {
            return Ok(plan);
        }
        Ok(LogicalPlan::Limit {
            input: Box::new(plan),
            skip,
            fetch,
        })
    }

    /// SELECT → LogicalPlan 변환
    fn plan_select(&self, select: &Select, order_by: &[OrderByExpr]) -> FlintResult<LogicalPlan> {
        check_select_clauses(select)?;

        // 1. FROM
        let mut plan = self.plan_from(&select.from)?;

        // 2. WHERE
        if let Some(selection) = &select.selection {
            let predicate = self.sql_to_expr(selection, &Scope::new(plan.schema()))?;
            if predicate.contains_aggregate() {
                return Err(FlintError::Plan(
                    "aggregate functions are not allowed in WHERE".to_string(),
                ));
            }
            let predicate = coerce_boolean(predicate, plan.schema(), "WHERE")?;
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            };
        }

        // 3. SELECT items, HAVING, ORDER BY and GROUP BY against the input
        let input_schema = Arc::clone(plan.schema());
        let mut select_exprs = self.plan_select_items(&select.projection, &input_schema)?;
        let scope = Scope::with_aliases(&input_schema, &select_exprs);

        let having = select
            .having
            .as_ref()
            .map(|h| self.sql_to_expr(h, &scope))
            .transpose()?;

        let mut sort_exprs = order_by
            .iter()
            .map(|ob| self.plan_order_by_expr(ob, &scope, &select_exprs))
            .collect::<FlintResult<Vec<_>>>()?;

        let group_by = match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(FlintError::NotSupported(
                        "GROUP BY modifiers (ROLLUP, CUBE, ...)".to_string(),
                    ));
                }
                let mut planned: Vec<Expr> = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let group = match ordinal(expr) {
                        Some(n) => select_item_at(&select_exprs, n)?,
                        None => self.sql_to_expr(expr, &scope)?,
                    };
                    if group.contains_aggregate() {
                        return Err(FlintError::Plan(
                            "aggregate functions are not allowed in GROUP BY".to_string(),
                        ));
                    }
                    let group = group.unalias();
                    if !planned.contains(&group) {
                        planned.push(group);
                    }
                }
                planned
            }
            GroupByExpr::All(_) => {
                return Err(FlintError::NotSupported("GROUP BY ALL".to_string()));
            }
        };

        // 4. Aggregate
        let mut aggregates = Vec::new();
        for expr in &select_exprs {
            expr.collect_aggregates(&mut aggregates);
        }
        if let Some(having) = &having {
            having.collect_aggregates(&mut aggregates);
        }
        for sort in &sort_exprs {
            sort.expr.collect_aggregates(&mut aggregates);
        }

        let mut having = having;
        if !group_by.is_empty() || !aggregates.is_empty() {
            for agg in &aggregates {
                if let Expr::Aggregate { arg: Some(arg), .. } = agg {
                    if arg.contains_aggregate() {
                        return Err(FlintError::Plan(
                            "aggregate function calls cannot be nested".to_string(),
                        ));
                    }
                }
            }
            let mut fields = Vec::with_capacity(group_by.len() + aggregates.len());
            for expr in group_by.iter().chain(&aggregates) {
                fields.push(expr.to_field(&input_schema)?);
            }
            let agg_schema = Arc::new(PlanSchema::new(fields)?);
            let outputs: Vec<Expr> = group_by.iter().chain(&aggregates).cloned().collect();

            select_exprs = select_exprs
                .into_iter()
                .map(|e| rebase(e, &outputs, &agg_schema))
                .collect::<FlintResult<_>>()?;
            having = having
                .map(|h| rebase(h, &outputs, &agg_schema))
                .transpose()?;
            for sort in &mut sort_exprs {
                sort.expr = rebase(sort.expr.clone(), &outputs, &agg_schema)?;
            }

            plan = LogicalPlan::Aggregate {
                input: Box::new(plan),
                group_by,
                aggregates,
                schema: agg_schema,
            };
        } else if having.is_some() {
            return Err(FlintError::Plan(
                "HAVING requires GROUP BY or an aggregate function".to_string(),
            ));
        }

        // 5. HAVING
        if let Some(having) = having {
            let predicate = coerce_boolean(having, plan.schema(), "HAVING")?;
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            };
        }

        let distinct = match &select.distinct {
            None => false,
            Some(Distinct::Distinct) => true,
            Some(Distinct::On(_)) => {
                return Err(FlintError::NotSupported("DISTINCT ON".to_string()));
            }
        };

        // 6. ORDER BY below the projection so it can use any input column
        if !distinct && !sort_exprs.is_empty() {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                order_by: sort_exprs.clone(),
            };
        }

        // 7. SELECT
        plan = project(plan, select_exprs.clone())?;

        // 8. DISTINCT groups by every output column; ORDER BY then sees only the output
        if distinct {
            let schema = Arc::clone(plan.schema());
            let group_by = schema.columns().into_iter().map(Expr::Column).collect();
            plan = LogicalPlan::Aggregate {
                input: Box::new(plan),
                group_by,
                aggregates: vec![],
                schema,
            };
            if !sort_exprs.is_empty() {
                let order_by = sort_exprs
                    .into_iter()
                    .map(|s| {
                        Ok(SortExpr {
                            expr: rebase_on_output(s.expr, &select_exprs, plan.schema())?,
                            ..s
                        })
                    })
                    .collect::<FlintResult<Vec<_>>>()?;
                plan = LogicalPlan::Sort {
                    input: Box::new(plan),
                    order_by,
                };
            }
        }

        Ok(plan)
    }

    /// ORDER BY applied to a finished query (`(SELECT ...) ORDER BY ...`).
    fn plan_sort_on_output(
        &self,
        plan: LogicalPlan,
        order_by: &[OrderByExpr],
    ) -> FlintResult<LogicalPlan> {
        if order_by.is_empty() {
            return Ok(plan);
        }
        let schema = Arc::clone(plan.schema());
        let outputs: Vec<Expr> = schema.columns().into_iter().map(Expr::Column).collect();
        let scope = Scope::new(&schema);
        let order_by = order_by
            .iter()
            .map(|ob| self.plan_order_by_expr(ob, &scope, &outputs))
            .collect::<FlintResult<Vec<_>>>()?;
        Ok(LogicalPlan::Sort {
            input: Box::new(plan),
            order_by,
        })
    }

    /// Convert sqlparser OrderByExpr → our SortExpr
    fn plan_order_by_expr(
        &self,
        ob: &OrderByExpr,
        scope: &Scope<'_>,
        select_exprs: &[Expr],
    ) -> FlintResult<SortExpr> {
        let expr = match (ordinal(&ob.expr), &ob.expr) {
            (Some(n), _) => select_item_at(select_exprs, n)?,
            // a bare name matching an output alias sorts by that output
            (None, SqlExpr::Identifier(ident)) => {
                match output_alias(scope.aliases, &normalize_ident(ident)) {
                    Some(aliased) => aliased.clone(),
                    None => self.sql_to_expr(&ob.expr, scope)?,
                }
            }
            (None, _) => self.sql_to_expr(&ob.expr, scope)?,
        };
        let asc = ob.asc.unwrap_or(true);
        Ok(SortExpr {
            expr: expr.unalias(),
            asc,
            nulls_first: ob.nulls_first.unwrap_or(!asc),
        })
    }

    /// Expand wildcards and plan each select item against the input schema.
    fn plan_select_items(
        &self,
        projection: &[SelectItem],
        schema: &PlanSchema,
    ) -> FlintResult<Vec<Expr>> {
        let scope = Scope::new(schema);
        let mut exprs = Vec::with_capacity(projection.len());
        for item in projection {
            match item {
                SelectItem::Wildcard(_) => {
                    if schema.is_empty() {
                        return Err(FlintError::Plan(
                            "SELECT * with no tables specified".to_string(),
                        ));
                    }
                    exprs.extend(schema.columns().into_iter().map(Expr::Column));
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let relation = object_name(name)?;
                    let columns: Vec<Expr> = schema
                        .fields()
                        .iter()
                        .filter(|f| f.qualifier.as_deref() == Some(relation.as_str()))
                        .map(|f| Expr::Column(f.column()))
                        .collect();
                    if columns.is_empty() {
                        return Err(FlintError::TableNotFound(relation));
                    }
                    exprs.extend(columns);
                }
                SelectItem::UnnamedExpr(expr) => exprs.push(self.sql_to_expr(expr, &scope)?),
                SelectItem::ExprWithAlias { expr, alias } => {
                    let planned = self.sql_to_expr(expr, &scope)?;
                    exprs.push(planned.alias(normalize_ident(alias)));
                }
            }
        }
        Ok(exprs)
    }

    // ===== FROM =====

    fn plan_from(&self, from: &[TableWithJoins]) -> FlintResult<LogicalPlan> {
        let mut relations = from.iter().map(|twj| self.plan_table_with_joins(twj));
        let Some(first) = relations.next() else {
            return Ok(LogicalPlan::EmptyRelation {
                produce_one_row: true,
                schema: Arc::new(PlanSchema::empty()),
            });
        };
        // FROM a, b is a cross join
        relations.try_fold(first?, |left, right| {
            join_plan(left, right?, JoinType::Inner, vec![], None)
        })
    }

    fn plan_table_with_joins(&self, twj: &TableWithJoins) -> FlintResult<LogicalPlan> {
        let mut plan = self.plan_table_factor(&twj.relation)?;
        for join in &twj.joins {
            let right = self.plan_table_factor(&join.relation)?;
            let (join_type, constraint) = match &join.join_operator {
                JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
                JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
                JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
                JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
                JoinOperator::CrossJoin => (JoinType::Inner, None),
                other => {
                    return Err(FlintError::NotSupported(format!("join operator {other:?}")));
                }
            };
            plan = match constraint {
                None | Some(JoinConstraint::None) => {
                    join_plan(plan, right, join_type, vec![], None)?
                }
                Some(JoinConstraint::On(expr)) => self.plan_join_on(plan, right, join_type, expr)?,
                Some(JoinConstraint::Using(idents)) => {
                    plan_join_using(plan, right, join_type, idents)?
                }
                Some(JoinConstraint::Natural) => {
                    return Err(FlintError::NotSupported("NATURAL JOIN".to_string()));
                }
            };
        }
        Ok(plan)
    }

    fn plan_table_factor(&self, factor: &TableFactor) -> FlintResult<LogicalPlan> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(FlintError::NotSupported("table functions".to_string()));
                }
                let table_name = object_name(name)?;
                let source = self
                    .catalog
                    .get(&table_name)
                    .or_else(|| self.catalog.get(&name.to_string()))
                    .ok_or_else(|| FlintError::TableNotFound(table_name.clone()))?;
                let qualifier = match alias {
                    Some(alias) => table_alias(alias)?,
                    None => table_name.clone(),
                };
                let schema = Arc::new(PlanSchema::from_arrow(Some(&qualifier), &source.schema()));
                Ok(LogicalPlan::Scan {
                    table: TableRef {
                        name: table_name,
                        source: Arc::clone(source),
                    },
                    qualifier,
                    projection: None,
                    filters: vec![],
                    schema,
                })
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                if *lateral {
                    return Err(FlintError::NotSupported("LATERAL subquery".to_string()));
                }
                let plan = self.plan_query(subquery)?;
                match alias {
                    Some(alias) => subquery_alias(plan, table_alias(alias)?),
                    None => Ok(plan),
                }
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                let plan = self.plan_table_with_joins(table_with_joins)?;
                match alias {
                    Some(alias) => subquery_alias(plan, table_alias(alias)?),
                    None => Ok(plan),
                }
            }
            other => Err(FlintError::NotSupported(format!("table factor {other}"))),
        }
    }

    /// Split an ON condition into equi-key pairs and a residual filter.
    fn plan_join_on(
        &self,
        left: LogicalPlan,
        right: LogicalPlan,
        join_type: JoinType,
        condition: &SqlExpr,
    ) -> FlintResult<LogicalPlan> {
        let joined = left.schema().join(right.schema())?;
        let condition = self.sql_to_expr(condition, &Scope::new(&joined))?;
        if condition.contains_aggregate() {
            return Err(FlintError::Plan(
                "aggregate functions are not allowed in JOIN conditions".to_string(),
            ));
        }
        let condition = coerce_boolean(condition, &joined, "JOIN ON")?;

        let mut on = Vec::new();
        let mut residual = Vec::new();
        for conjunct in split_conjunction(condition) {
            match equi_pair(&conjunct, left.schema(), right.schema()) {
                Some(pair) => on.push(pair),
                None => residual.push(conjunct),
            }
        }
        let filter = crate::sql::planner::expr::conjunction(residual);
        join_plan(left, right, join_type, on, filter)
    }

    // ===== Expressions =====

    /// SQL Expr → Logical Expr 변환
    fn sql_to_expr(&self, sql: &SqlExpr, scope: &Scope<'_>) -> FlintResult<Expr> {
        match sql {
            SqlExpr::Identifier(ident) => {
                resolve_column(Column::unqualified(normalize_ident(ident)), scope)
            }
            SqlExpr::CompoundIdentifier(idents) => match idents.as_slice() {
                [relation, name] => resolve_column(
                    Column::new(Some(normalize_ident(relation)), normalize_ident(name)),
                    scope,
                ),
                _ => Err(FlintError::NotSupported(format!("qualified name {sql}"))),
            },
            SqlExpr::Value(value) => Ok(Expr::Literal(convert_value(value)?)),
            SqlExpr::Nested(inner) => self.sql_to_expr(inner, scope),
            SqlExpr::BinaryOp { left, op, right } => {
                let left = self.sql_to_expr(left, scope)?;
                let right = self.sql_to_expr(right, scope)?;
                if *op == SqlBinaryOp::StringConcat {
                    return scalar_function(ScalarFunction::Concat, vec![left, right], scope.schema);
                }
                binary_expr(left, convert_binary_op(op)?, right, scope.schema)
            }
            SqlExpr::UnaryOp { op, expr } => {
                let inner = self.sql_to_expr(expr, scope)?;
                let data_type = inner.data_type(scope.schema)?;
                match op {
                    UnaryOperator::Not => {
                        Ok(Expr::Not(Box::new(coerce_boolean(inner, scope.schema, "NOT")?)))
                    }
                    UnaryOperator::Minus if is_numeric(&data_type) => {
                        Ok(Expr::Negative(Box::new(inner)))
                    }
                    UnaryOperator::Minus if data_type == DataType::Null => Ok(inner),
                    UnaryOperator::Plus if is_numeric(&data_type) => Ok(inner),
                    UnaryOperator::Minus | UnaryOperator::Plus => {
                        Err(FlintError::type_mismatch("numeric operand", &data_type))
                    }
                    other => Err(FlintError::NotSupported(format!("unary operator {other}"))),
                }
            }
            SqlExpr::IsNull(inner) => Ok(Expr::IsNull(Box::new(self.sql_to_expr(inner, scope)?))),
            SqlExpr::IsNotNull(inner) => {
                Ok(Expr::IsNotNull(Box::new(self.sql_to_expr(inner, scope)?)))
            }
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.sql_to_expr(expr, scope)?;
                let low = self.sql_to_expr(low, scope)?;
                let high = self.sql_to_expr(high, scope)?;
                let schema = scope.schema;
                if *negated {
                    let below = binary_expr(value.clone(), BinaryOperator::Lt, low, schema)?;
                    let above = binary_expr(value, BinaryOperator::Gt, high, schema)?;
                    binary_expr(below, BinaryOperator::Or, above, schema)
                } else {
                    let from = binary_expr(value.clone(), BinaryOperator::GtEq, low, schema)?;
                    let to = binary_expr(value, BinaryOperator::LtEq, high, schema)?;
                    binary_expr(from, BinaryOperator::And, to, schema)
                }
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.sql_to_expr(expr, scope)?;
                let (cmp, combine) = if *negated {
                    (BinaryOperator::NotEq, BinaryOperator::And)
                } else {
                    (BinaryOperator::Eq, BinaryOperator::Or)
                };
                let mut combined: Option<Expr> = None;
                for item in list {
                    let item = self.sql_to_expr(item, scope)?;
                    let test = binary_expr(value.clone(), cmp, item, scope.schema)?;
                    combined = Some(match combined {
                        Some(acc) => binary_expr(acc, combine, test, scope.schema)?,
                        None => test,
                    });
                }
                combined.ok_or_else(|| FlintError::Plan("IN list is empty".to_string()))
            }
            SqlExpr::Cast {
                kind,
                expr,
                data_type,
                format,
            } => {
                if format.is_some()
                    || !matches!(kind, ast::CastKind::Cast | ast::CastKind::DoubleColon)
                {
                    return Err(FlintError::NotSupported(sql.to_string()));
                }
                let inner = self.sql_to_expr(expr, scope)?;
                let from = inner.data_type(scope.schema)?;
                let to = convert_data_type(data_type)?;
                if !can_cast_types(&from, &to) {
                    return Err(FlintError::type_mismatch(
                        format!("a type castable to {to:?}"),
                        &from,
                    ));
                }
                Ok(cast(inner, &from, &to))
            }
            SqlExpr::Trim {
                expr,
                trim_where: None,
                trim_what: None,
                ..
            } => {
                let inner = self.sql_to_expr(expr, scope)?;
                scalar_function(ScalarFunction::Trim, vec![inner], scope.schema)
            }
            SqlExpr::Ceil { expr, field } if is_plain_ceil_floor(field) => {
                let inner = self.sql_to_expr(expr, scope)?;
                scalar_function(ScalarFunction::Ceil, vec![inner], scope.schema)
            }
            SqlExpr::Floor { expr, field } if is_plain_ceil_floor(field) => {
                let inner = self.sql_to_expr(expr, scope)?;
                scalar_function(ScalarFunction::Floor, vec![inner], scope.schema)
            }
            SqlExpr::Function(func) => self.plan_function(func, scope),
            SqlExpr::Subquery(_) | SqlExpr::InSubquery { .. } | SqlExpr::Exists { .. } => {
                Err(FlintError::NotSupported("subquery expressions".to_string()))
            }
            other => Err(FlintError::NotSupported(format!("expression {other}"))),
        }
    }

    fn plan_function(&self, func: &ast::Function, scope: &Scope<'_>) -> FlintResult<Expr> {
        let name = func.name.to_string().to_lowercase();
        if func.over.is_some() {
            return Err(FlintError::NotSupported(format!("window function {name}")));
        }
        if func.filter.is_some() || !func.within_group.is_empty() {
            return Err(FlintError::NotSupported(format!("{name} with FILTER/WITHIN GROUP")));
        }
        if !matches!(func.parameters, FunctionArguments::None) {
            return Err(FlintError::NotSupported(format!("parameterized function {name}")));
        }

        // `None` stands for `*`
        let mut args: Vec<Option<Expr>> = Vec::new();
        match &func.args {
            FunctionArguments::None => {}
            FunctionArguments::Subquery(_) => {
                return Err(FlintError::NotSupported("subquery expressions".to_string()));
            }
            FunctionArguments::List(list) => {
                if list.duplicate_treatment == Some(DuplicateTreatment::Distinct) {
                    return Err(FlintError::NotSupported(format!("{name}(DISTINCT ...)")));
                }
                if !list.clauses.is_empty() {
                    return Err(FlintError::NotSupported(format!("{name} argument clauses")));
                }
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            args.push(Some(self.sql_to_expr(e, scope)?));
                        }
                        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => args.push(None),
                        other => {
                            return Err(FlintError::NotSupported(format!(
                                "function argument {other}"
                            )));
                        }
                    }
                }
            }
        }

        if let Some(agg) = AggregateFunction::from_name(&name) {
            let arg = match (agg, args.as_slice()) {
                (AggregateFunction::Count, [] | [None]) => None,
                (_, [Some(arg)]) => Some(Box::new(arg.clone())),
                _ => {
                    return Err(FlintError::Plan(format!("{name} expects exactly one argument")));
                }
            };
            let call = Expr::Aggregate { func: agg, arg };
            // surfaces argument type errors at planning time
            call.data_type(scope.schema)?;
            return Ok(call);
        }

        if let Some(scalar) = ScalarFunction::from_name(&name) {
            let args = args
                .into_iter()
                .map(|a| a.ok_or_else(|| FlintError::Plan(format!("{name}(*) is not valid"))))
                .collect::<FlintResult<Vec<_>>>()?;
            return scalar_function(scalar, args, scope.schema);
        }

        Err(FlintError::NotSupported(format!("function {name}")))
    }
}

fn check_select_clauses(select: &Select) -> FlintResult<()> {
    let unsupported = if select.top.is_some() {
        Some("TOP")
    } else if select.into.is_some() {
        Some("SELECT INTO")
    } else if !select.lateral_views.is_empty() {
        Some("LATERAL VIEW")
    } else if !select.named_window.is_empty() {
        Some("WINDOW clause")
    } else if select.qualify.is_some() {
        Some("QUALIFY")
    } else {
        None
    };
    match unsupported {
        Some(clause) => Err(FlintError::NotSupported(clause.to_string())),
        None => Ok(()),
    }
}

fn object_name(name: &ObjectName) -> FlintResult<String> {
    match name.0.as_slice() {
        [ident] => Ok(normalize_ident(ident)),
        _ => Err(FlintError::NotSupported(format!("qualified table name {name}"))),
    }
}

fn table_alias(alias: &ast::TableAlias) -> FlintResult<String> {
    if !alias.columns.is_empty() {
        return Err(FlintError::NotSupported("column aliases in table alias".to_string()));
    }
    Ok(normalize_ident(&alias.name))
}

fn is_plain_ceil_floor(field: &CeilFloorKind) -> bool {
    matches!(
        field,
        CeilFloorKind::DateTimeField(DateTimeField::NoDateTime)
    )
}

/// A bare positive integer in ORDER BY / GROUP BY refers to a select item.
fn ordinal(expr: &SqlExpr) -> Option<usize> {
    match expr {
        SqlExpr::Value(Value::Number(n, _)) => n.parse::<usize>().ok(),
        _ => None,
    }
}

fn select_item_at(select_exprs: &[Expr], position: usize) -> FlintResult<Expr> {
    position
        .checked_sub(1)
        .and_then(|i| select_exprs.get(i))
        .map(|e| e.clone().unalias())
        .ok_or_else(|| {
            FlintError::Plan(format!(
                "ordinal {position} is out of range for {} select items",
                select_exprs.len()
            ))
        })
}

fn convert_value(value: &Value) -> FlintResult<ScalarValue> {
    match value {
        Value::Number(n, _) => {
            let is_integer = !n.contains(['.', 'e', 'E']);
            if is_integer {
                if let Ok(i) = n.parse::<i64>() {
                    return Ok(ScalarValue::Int64(i));
                }
            }
            n.parse::<f64>()
                .map(ScalarValue::Float64)
                .map_err(|_| FlintError::Plan(format!("invalid number literal: {n}")))
        }
        Value::SingleQuotedString(s) => Ok(ScalarValue::Utf8(s.clone())),
        Value::Boolean(b) => Ok(ScalarValue::Boolean(*b)),
        Value::Null => Ok(ScalarValue::Null),
        other => Err(FlintError::NotSupported(format!("literal {other}"))),
    }
}

fn output_alias<'e>(aliases: &'e [Expr], name: &str) -> Option<&'e Expr> {
    aliases.iter().find_map(|e| match e {
        Expr::Alias { expr, name: alias } if alias == name => Some(expr.as_ref()),
        _ => None,
    })
}

fn resolve_column(column: Column, scope: &Scope<'_>) -> FlintResult<Expr> {
    match scope.schema.index_of(&column) {
        Ok(idx) => Ok(Expr::Column(scope.schema.field(idx).column())),
        Err(FlintError::ColumnNotFound(missing)) => {
            if column.relation.is_none() {
                if let Some(expr) = output_alias(scope.aliases, &column.name) {
                    return Ok(expr.clone());
                }
            }
            Err(FlintError::ColumnNotFound(missing))
        }
        Err(e) => Err(e),
    }
}

fn cast(expr: Expr, from: &DataType, to: &DataType) -> Expr {
    if from == to {
        expr
    } else {
        Expr::Cast {
            expr: Box::new(expr),
            data_type: to.clone(),
        }
    }
}

fn coerce_boolean(expr: Expr, schema: &PlanSchema, clause: &str) -> FlintResult<Expr> {
    match expr.data_type(schema)? {
        DataType::Boolean => Ok(expr),
        DataType::Null => Ok(cast(expr, &DataType::Null, &DataType::Boolean)),
        other => Err(FlintError::type_mismatch(format!("Boolean in {clause}"), &other)),
    }
}

/// Type-check a binary operation, widening operands to a common type.
fn binary_expr(
    left: Expr,
    op: BinaryOperator,
    right: Expr,
    schema: &PlanSchema,
) -> FlintResult<Expr> {
    if op.is_logical() {
        let left = coerce_boolean(left, schema, "logical operator")?;
        let right = coerce_boolean(right, schema, "logical operator")?;
        return Ok(Expr::binary(left, op, right));
    }

    let lt = left.data_type(schema)?;
    let rt = right.data_type(schema)?;
    let common = if op.is_arithmetic() {
        arithmetic_type(&lt, &rt)
    } else {
        comparison_type(&lt, &rt)
    }
    .ok_or_else(|| {
        FlintError::type_mismatch(format!("operands compatible with {lt:?} for '{op}'"), &rt)
    })?;
    Ok(Expr::binary(cast(left, &lt, &common), op, cast(right, &rt, &common)))
}

fn arithmetic_type(left: &DataType, right: &DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Null, DataType::Null) => Some(DataType::Int64),
        (DataType::Null, other) | (other, DataType::Null) if is_numeric(other) => {
            Some(other.clone())
        }
        _ => wider_numeric(left, right),
    }
}

fn comparison_type(left: &DataType, right: &DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Null, DataType::Null) => Some(DataType::Int64),
        (DataType::Null, other) | (other, DataType::Null) => Some(other.clone()),
        (l, r) if l == r => Some(l.clone()),
        (l, r) if is_string(l) && is_string(r) => Some(DataType::Utf8),
        _ => wider_numeric(left, right),
    }
}

/// Check argument count and types of a scalar function call, inserting casts.
fn scalar_function(
    func: ScalarFunction,
    args: Vec<Expr>,
    schema: &PlanSchema,
) -> FlintResult<Expr> {
    let types = args
        .iter()
        .map(|a| a.data_type(schema))
        .collect::<FlintResult<Vec<_>>>()?;
    let arity_error = || FlintError::Plan(format!("wrong number of arguments to {func}"));

    let args = match func {
        ScalarFunction::Upper
        | ScalarFunction::Lower
        | ScalarFunction::Trim
        | ScalarFunction::Length => {
            let ([arg], [dt]) = (args.as_slice(), types.as_slice()) else {
                return Err(arity_error());
            };
            if !(is_string(dt) || *dt == DataType::Null) {
                return Err(FlintError::type_mismatch(format!("string argument to {func}"), dt));
            }
            vec![cast(arg.clone(), dt, &DataType::Utf8)]
        }
        ScalarFunction::Concat => {
            if args.is_empty() {
                return Err(arity_error());
            }
            args.into_iter()
                .zip(&types)
                .map(|(arg, dt)| {
                    if can_cast_types(dt, &DataType::Utf8) {
                        Ok(cast(arg, dt, &DataType::Utf8))
                    } else {
                        Err(FlintError::type_mismatch("argument castable to Utf8", dt))
                    }
                })
                .collect::<FlintResult<_>>()?
        }
        ScalarFunction::Abs => {
            let ([arg], [dt]) = (args.as_slice(), types.as_slice()) else {
                return Err(arity_error());
            };
            match dt {
                DataType::Null => vec![cast(arg.clone(), dt, &DataType::Int64)],
                dt if is_numeric(dt) => vec![arg.clone()],
                dt => return Err(FlintError::type_mismatch("numeric argument to abs", dt)),
            }
        }
        ScalarFunction::Round => {
            let (value, digits) = match (args.as_slice(), types.as_slice()) {
                ([v], [vt]) => ((v, vt), None),
                ([v, d], [vt, dt]) => ((v, vt), Some((d, dt))),
                _ => return Err(arity_error()),
            };
            let mut out = vec![numeric_to_float(value.0.clone(), value.1, func)?];
            if let Some((d, dt)) = digits {
                if !(is_integer(dt) || *dt == DataType::Null) {
                    return Err(FlintError::type_mismatch("integer digits for round", dt));
                }
                out.push(cast(d.clone(), dt, &DataType::Int64));
            }
            out
        }
        ScalarFunction::Ceil | ScalarFunction::Floor | ScalarFunction::Sqrt => {
            let ([arg], [dt]) = (args.as_slice(), types.as_slice()) else {
                return Err(arity_error());
            };
            vec![numeric_to_float(arg.clone(), dt, func)?]
        }
    };
    Ok(Expr::ScalarFunction { func, args })
}

fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
    )
}

fn numeric_to_float(arg: Expr, dt: &DataType, func: ScalarFunction) -> FlintResult<Expr> {
    if is_numeric(dt) || *dt == DataType::Null {
        Ok(cast(arg, dt, &DataType::Float64))
    } else {
        Err(FlintError::type_mismatch(format!("numeric argument to {func}"), dt))
    }
}

/// `l = r` with one side over the left input only and the other over the right only.
fn equi_pair(expr: &Expr, left: &PlanSchema, right: &PlanSchema) -> Option<(Expr, Expr)> {
    let Expr::BinaryOp {
        left: a,
        op: BinaryOperator::Eq,
        right: b,
    } = expr
    else {
        return None;
    };
    let (a_cols, b_cols) = (a.columns(), b.columns());
    if a_cols.is_empty() || b_cols.is_empty() {
        return None;
    }
    let only = |cols: &std::collections::HashSet<Column>, schema: &PlanSchema| {
        cols.iter().all(|c| schema.has_column(c))
    };
    if only(&a_cols, left) && only(&b_cols, right) {
        Some((a.as_ref().clone(), b.as_ref().clone()))
    } else if only(&a_cols, right) && only(&b_cols, left) {
        Some((b.as_ref().clone(), a.as_ref().clone()))
    } else {
        None
    }
}

fn plan_join_using(
    left: LogicalPlan,
    right: LogicalPlan,
    join_type: JoinType,
    idents: &[Ident],
) -> FlintResult<LogicalPlan> {
    let mut on = Vec::with_capacity(idents.len());
    for ident in idents {
        let name = normalize_ident(ident);
        let l = resolve_column(
            Column::unqualified(name.clone()),
            &Scope::new(left.schema()),
        )?;
        let r = resolve_column(Column::unqualified(name), &Scope::new(right.schema()))?;
        let lt = l.data_type(left.schema())?;
        let rt = r.data_type(right.schema())?;
        let common = comparison_type(&lt, &rt)
            .ok_or_else(|| FlintError::type_mismatch(format!("{lt:?} in USING"), &rt))?;
        on.push((cast(l, &lt, &common), cast(r, &rt, &common)));
    }
    join_plan(left, right, join_type, on, None)
}

pub(crate) fn join_plan(
    left: LogicalPlan,
    right: LogicalPlan,
    join_type: JoinType,
    on: Vec<(Expr, Expr)>,
    filter: Option<Expr>,
) -> FlintResult<LogicalPlan> {
    let left_schema = if join_type.preserves_right() {
        left.schema().as_nullable()
    } else {
        left.schema().as_ref().clone()
    };
    let right_schema = if join_type.preserves_left() {
        right.schema().as_nullable()
    } else {
        right.schema().as_ref().clone()
    };
    let schema = Arc::new(left_schema.join(&right_schema)?);
    Ok(LogicalPlan::Join {
        left: Box::new(left),
        right: Box::new(right),
        join_type,
        on,
        filter,
        schema,
    })
}

pub(crate) fn subquery_alias(plan: LogicalPlan, alias: String) -> FlintResult<LogicalPlan> {
    let schema = Arc::new(plan.schema().with_qualifier(&alias)?);
    Ok(LogicalPlan::SubqueryAlias {
        input: Box::new(plan),
        alias,
        schema,
    })
}

/// Build a Project node, deriving its schema from the expressions.
pub(crate) fn project(input: LogicalPlan, exprs: Vec<Expr>) -> FlintResult<LogicalPlan> {
    let fields = exprs
        .iter()
        .map(|e| e.to_field(input.schema()))
        .collect::<FlintResult<Vec<_>>>()?;
    let schema: PlanSchemaRef = Arc::new(PlanSchema::new(fields)?);
    Ok(LogicalPlan::Project {
        input: Box::new(input),
        exprs,
        schema,
    })
}

/// Replace subexpressions computed by an Aggregate with references to its output.
fn rebase(expr: Expr, outputs: &[Expr], schema: &PlanSchema) -> FlintResult<Expr> {
    let rebased = expr.transform_down(&mut |e| {
        Ok(outputs
            .iter()
            .position(|o| o == e)
            .map(|i| Expr::Column(schema.field(i).column())))
    })?;
    for column in rebased.columns() {
        if !schema.has_column(&column) {
            return Err(FlintError::Plan(format!(
                "column '{column}' must appear in the GROUP BY clause or be used in an aggregate function"
            )));
        }
    }
    Ok(rebased)
}

/// Express an ORDER BY key of a DISTINCT query over its output columns.
fn rebase_on_output(
    expr: Expr,
    select_exprs: &[Expr],
    output: &PlanSchema,
) -> FlintResult<Expr> {
    let unaliased: Vec<Expr> = select_exprs.iter().map(|e| e.clone().unalias()).collect();
    let rebased = expr.transform_down(&mut |e| {
        Ok(unaliased
            .iter()
            .position(|o| o == e)
            .map(|i| Expr::Column(output.field(i).column())))
    })?;
    for column in rebased.columns() {
        if !output.has_column(&column) {
            return Err(FlintError::Plan(format!(
                "ORDER BY expression '{column}' must appear in the select list of SELECT DISTINCT"
            )));
        }
    }
    Ok(rebased)
}
