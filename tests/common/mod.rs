//! Shared helpers for integration tests: in-memory collaborators for the
//! planner and query-tree builders.
//!
//! Relation oids used throughout:
//!
//! | oid | table        | distribution            |
//! |-----|--------------|-------------------------|
//! | 1   | `orders`     | hash, colocation group 1 |
//! | 2   | `lineitem`   | hash, colocation group 1 |
//! | 4   | `events`     | hash, colocation group 2 |
//! | 5   | `countries`  | reference table          |
//! | 6   | `measures`   | hash, group 1, partitioned |
//! | 3   | `local_log`  | local                    |

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};

use pg_shardplan::config::PlannerSettings;
use pg_shardplan::error::{DeferredError, PlannerError};
use pg_shardplan::interfaces::{
    BoundParams, ColocationOracle, CursorOptions, DistributedPlanBuilder, DistributionCatalog,
    HostPlanner, LogicalPlan, PartitionMethod, PlannerHooks, PushdownOracle, RouterPlanner,
};
use pg_shardplan::plan::{DistributedPlan, DistributedScan, Job, PlanNode, PlannedStatement, SessionIdentity};
use pg_shardplan::planner::{Collaborators, DistributedPlanner};
use pg_shardplan::query::{
    walker, ColumnType, CommandType, CommonTableExpr, Expr, FunctionId, JoinTreeNode, JoinType,
    Oid, ParamKind, Query, QueryId, QueryTree, RangeTableEntry, RelationId, RteIdentity, RteKind,
    SetOperation, SetOperationTree, TargetEntry, INT4OID,
};
use pg_shardplan::restriction::{JoinRestriction, PlannerScope, RelationInfo, RestrictionContext};

pub const ORDERS: Oid = 1;
pub const LINEITEM: Oid = 2;
pub const LOCAL_LOG: Oid = 3;
pub const EVENTS: Oid = 4;
pub const COUNTRIES: Oid = 5;
pub const MEASURES: Oid = 6;

pub const READ_RESULT_FUNCTION: FunctionId = FunctionId(9000);

pub const SHARD_COUNT: usize = 4;

// ── Catalog ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MockCatalog {
    pub active: bool,
    /// oid -> (partition method, colocation group)
    pub tables: HashMap<Oid, (PartitionMethod, u32)>,
    pub partitioned: BTreeSet<Oid>,
}

impl MockCatalog {
    pub fn new() -> Self {
        let tables = [
            (ORDERS, (PartitionMethod::Hash, 1)),
            (LINEITEM, (PartitionMethod::Hash, 1)),
            (EVENTS, (PartitionMethod::Hash, 2)),
            (COUNTRIES, (PartitionMethod::None, 0)),
            (MEASURES, (PartitionMethod::Hash, 1)),
        ]
        .into_iter()
        .collect();
        MockCatalog {
            active: true,
            tables,
            partitioned: [MEASURES].into_iter().collect(),
        }
    }

    pub fn colocation_group(&self, relation: RelationId) -> Option<u32> {
        self.tables.get(&relation.0).map(|(_, group)| *group)
    }
}

impl DistributionCatalog for MockCatalog {
    fn is_active(&self) -> bool {
        self.active
    }

    fn is_distributed(&self, relation: RelationId) -> bool {
        self.tables.contains_key(&relation.0)
    }

    fn partition_method(&self, relation: RelationId) -> PartitionMethod {
        self.tables
            .get(&relation.0)
            .map(|(method, _)| *method)
            .unwrap_or(PartitionMethod::None)
    }

    fn is_partitioned_table(&self, relation: RelationId) -> bool {
        self.partitioned.contains(&relation.0)
    }

    fn intermediate_result_function(&self) -> FunctionId {
        READ_RESULT_FUNCTION
    }
}

// ── Colocation ─────────────────────────────────────────────────────────────

/// Relations are joined on their partition keys when they all belong to
/// one colocation group. Reference tables are ignored.
pub struct MockColocation {
    pub catalog: MockCatalog,
}

impl MockColocation {
    fn partitioned_relations(&self, restrictions: &RestrictionContext) -> Vec<(RteIdentity, u32)> {
        restrictions
            .relations
            .relations
            .iter()
            .filter(|r| r.distributed && r.partition_method != PartitionMethod::None)
            .filter_map(|r| {
                let identity = r.identity?;
                let group = self.catalog.colocation_group(r.relation_id)?;
                Some((identity, group))
            })
            .collect()
    }
}

impl ColocationOracle for MockColocation {
    fn safe_to_pushdown_union(&self, restrictions: &RestrictionContext) -> bool {
        self.restriction_equivalence_on_partition_keys(restrictions)
    }

    fn restriction_equivalence_on_partition_keys(&self, restrictions: &RestrictionContext) -> bool {
        let groups: BTreeSet<u32> = self
            .partitioned_relations(restrictions)
            .into_iter()
            .map(|(_, group)| group)
            .collect();
        groups.len() <= 1
    }

    fn fewest_colocated_joins_identity(&self, restrictions: &RestrictionContext) -> Option<RteIdentity> {
        let relations = self.partitioned_relations(restrictions);
        relations
            .iter()
            .map(|(identity, group)| {
                let peers = relations.iter().filter(|(_, g)| g == group).count() - 1;
                (peers, *identity)
            })
            .min()
            .map(|(_, identity)| identity)
    }
}

// ── Pushdown checks ────────────────────────────────────────────────────────

/// Subqueries with a LIMIT need a merge step and cannot be pushed down.
pub struct MockPushdown;

impl PushdownOracle for MockPushdown {
    fn cannot_pushdown_subquery(&self, tree: &QueryTree, query: QueryId) -> Option<DeferredError> {
        tree.query(query).limit_count.as_ref().map(|_| {
            DeferredError::new(
                pg_shardplan::error::SqlState::FeatureNotSupported,
                "cannot push down this subquery",
            )
            .with_detail("Limit in subquery is currently unsupported")
        })
    }

    fn query_not_supported(&self, _tree: &QueryTree, _query: QueryId) -> Option<DeferredError> {
        None
    }

    fn unsupported_union_query(&self, _tree: &QueryTree, _query: QueryId) -> Option<DeferredError> {
        None
    }

    fn contains_union_subquery(&self, tree: &QueryTree, query: QueryId) -> bool {
        tree.query(query).set_operations.is_some()
    }

    fn single_relation_repartition_subquery(&self, _tree: &QueryTree, _query: QueryId) -> bool {
        false
    }
}

// ── Host planner ───────────────────────────────────────────────────────────

/// Reports every base relation and every explicit join through the hooks
/// and returns a local plan over the root's target list.
#[derive(Default)]
pub struct MockHost {
    pub calls: Cell<usize>,
    /// Relation added to the root while planning, as if a SQL function
    /// had been inlined.
    pub inline_relation: Option<Oid>,
    /// `(oid, inherit)` of every relation reported.
    pub seen_relations: RefCell<Vec<(Oid, bool)>>,
}

impl MockHost {
    fn report_query(
        &self,
        tree: &QueryTree,
        query: QueryId,
        level: u32,
        hooks: &mut dyn PlannerHooks,
    ) -> Result<(), PlannerError> {
        let q = tree.query(query);
        for (i, rte) in q.range_table.iter().enumerate() {
            if let Some(relation) = rte.as_relation() {
                self.seen_relations
                    .borrow_mut()
                    .push((relation.relation_id.0, relation.inherit));
                hooks.on_relation(i + 1, rte, RelationInfo::default(), PlannerScope { query_level: level })?;
            }
        }
        for item in &q.join_tree.items {
            report_joins(tree, query, item, level, hooks)?;
        }
        for child in walker::direct_subqueries(tree, query) {
            self.report_query(tree, child, level + 1, hooks)?;
        }
        Ok(())
    }
}

fn side_identities(tree: &QueryTree, query: QueryId, node: &JoinTreeNode) -> BTreeSet<RteIdentity> {
    let mut out = BTreeSet::new();
    for index in node.range_table_refs() {
        let Some(rte) = tree.query(query).rte(index) else {
            continue;
        };
        if let Some(identity) = rte.as_relation().and_then(|r| r.identity) {
            out.insert(identity);
        }
        if let Some(sub) = rte.subquery_id() {
            out.extend(pg_shardplan::identity::query_rte_identities(tree, sub));
        }
    }
    out
}

fn report_joins(
    tree: &QueryTree,
    query: QueryId,
    node: &JoinTreeNode,
    level: u32,
    hooks: &mut dyn PlannerHooks,
) -> Result<(), PlannerError> {
    let JoinTreeNode::Join(join) = node else {
        return Ok(());
    };
    report_joins(tree, query, &join.left, level, hooks)?;
    report_joins(tree, query, &join.right, level, hooks)?;
    hooks.on_join(JoinRestriction {
        join_type: join.join_type,
        filters: join.quals.iter().cloned().collect(),
        outer: side_identities(tree, query, &join.left),
        inner: side_identities(tree, query, &join.right),
        scope: PlannerScope { query_level: level },
    })
}

impl HostPlanner for MockHost {
    fn plan(
        &self,
        tree: &mut QueryTree,
        _cursor_options: CursorOptions,
        _params: Option<&BoundParams>,
        hooks: &mut dyn PlannerHooks,
    ) -> Result<PlannedStatement, PlannerError> {
        self.calls.set(self.calls.get() + 1);

        if let Some(oid) = self.inline_relation {
            let root = tree.root_query_mut();
            let index = root.add_range_table_entry(RangeTableEntry::relation("inlined", RelationId(oid), &["a"]));
            root.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
        }

        let root = tree.root();
        self.report_query(tree, root, 1, hooks)?;

        let relation_oids = walker::base_relation_refs(tree, root)
            .into_iter()
            .filter_map(|(q, i)| tree.query(q).rte(i).and_then(|rte| rte.as_relation()))
            .map(|relation| relation.relation_id)
            .collect();

        let root_query = tree.root_query();
        let mut planned = PlannedStatement::new(
            root_query.command,
            PlanNode::Local {
                description: "Mock Scan".to_string(),
                target_list: root_query.target_list.clone(),
                total_cost: 10.0,
            },
        );
        planned.range_table = root_query.range_table.clone();
        planned.relation_oids = relation_oids;
        planned.query_id = 4711;
        planned.has_returning = !root_query.returning_list.is_empty();
        Ok(planned)
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub enum RouterBehavior {
    Decline,
    Route,
    Fail(DeferredError),
}

pub struct MockRouter {
    pub behavior: RouterBehavior,
    pub calls: Cell<usize>,
}

impl MockRouter {
    pub fn new(behavior: RouterBehavior) -> Self {
        MockRouter {
            behavior,
            calls: Cell::new(0),
        }
    }
}

impl RouterPlanner for MockRouter {
    fn try_route(
        &self,
        original: &QueryTree,
        _transformed: &QueryTree,
        _restrictions: &RestrictionContext,
    ) -> Option<DistributedPlan> {
        self.calls.set(self.calls.get() + 1);
        let command = original.root_query().command;
        match &self.behavior {
            RouterBehavior::Decline => None,
            RouterBehavior::Route => {
                let mut plan = DistributedPlan::new(command);
                plan.router_executable = true;
                plan.worker_job = Some(Job {
                    job_id: 1,
                    task_count: 1,
                    has_dependent_jobs: false,
                });
                Some(plan)
            }
            RouterBehavior::Fail(error) => Some(DistributedPlan::with_error(command, error.clone())),
        }
    }
}

// ── Plan builder ───────────────────────────────────────────────────────────

/// Every multi-task plan fans out to all shards and needs a combiner.
#[derive(Default)]
pub struct MockBuilder {
    pub logical_plans: Cell<usize>,
    /// Error stored in every modify plan.
    pub modify_error: Option<DeferredError>,
}

fn multi_shard_plan(command: CommandType) -> DistributedPlan {
    let mut plan = DistributedPlan::new(command);
    plan.worker_job = Some(Job {
        job_id: 1,
        task_count: SHARD_COUNT,
        has_dependent_jobs: false,
    });
    plan
}

impl DistributedPlanBuilder for MockBuilder {
    fn build_logical_plan(
        &self,
        original: &QueryTree,
        _transformed: &QueryTree,
        restrictions: &RestrictionContext,
        _params: Option<&BoundParams>,
    ) -> Result<LogicalPlan, PlannerError> {
        self.logical_plans.set(self.logical_plans.get() + 1);
        Ok(LogicalPlan {
            tree: serde_json::json!({
                "queries": original.len(),
                "relations": restrictions.relations.relations.len(),
            }),
        })
    }

    fn optimize_logical_plan(&self, _plan: &mut LogicalPlan) -> Result<(), PlannerError> {
        Ok(())
    }

    fn build_physical_plan(
        &self,
        _logical: LogicalPlan,
        _restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError> {
        let mut plan = multi_shard_plan(CommandType::Select);
        plan.master_query = Some(QueryTree::new(Query::select()));
        Ok(plan)
    }

    fn build_modify_plan(
        &self,
        original: &QueryTree,
        _transformed: &QueryTree,
        _restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError> {
        let root = original.root_query();
        let mut plan = multi_shard_plan(root.command);
        plan.has_returning = !root.returning_list.is_empty();
        plan.planning_error = self.modify_error.clone();
        Ok(plan)
    }

    fn build_insert_select_plan(
        &self,
        original: &QueryTree,
        _restrictions: &RestrictionContext,
    ) -> Result<DistributedPlan, PlannerError> {
        let mut plan = DistributedPlan::new(CommandType::Insert);
        plan.insert_select_query = Some(original.clone());
        Ok(plan)
    }

    fn build_combiner_plan(&self, scan: DistributedScan) -> Result<PlannedStatement, PlannerError> {
        let total_cost = scan.total_cost;
        Ok(PlannedStatement::new(
            scan.plan.operation,
            PlanNode::Combiner {
                target_list: Vec::new(),
                child: Box::new(PlanNode::DistributedScan(Box::new(scan))),
                total_cost,
            },
        ))
    }
}

// ── Planner fixture ────────────────────────────────────────────────────────

/// Owns one set of collaborators and hands out planners over them.
pub struct Fixture {
    pub settings: PlannerSettings,
    pub catalog: MockCatalog,
    pub colocation: MockColocation,
    pub pushdown: MockPushdown,
    pub host: MockHost,
    pub router: MockRouter,
    pub builder: MockBuilder,
}

impl Fixture {
    pub fn new() -> Self {
        let catalog = MockCatalog::new();
        Fixture {
            settings: PlannerSettings::default(),
            colocation: MockColocation {
                catalog: catalog.clone(),
            },
            catalog,
            pushdown: MockPushdown,
            host: MockHost::default(),
            router: MockRouter::new(RouterBehavior::Decline),
            builder: MockBuilder::default(),
        }
    }

    pub fn planner(&self) -> DistributedPlanner<'_> {
        DistributedPlanner::new(
            self.settings.clone(),
            session(),
            Collaborators {
                host: &self.host,
                router: &self.router,
                catalog: &self.catalog,
                colocation: &self.colocation,
                pushdown: &self.pushdown,
                builder: &self.builder,
            },
        )
    }
}

pub fn session() -> SessionIdentity {
    SessionIdentity::for_backend(&PlannerSettings::default(), 10, 4242)
}

// ── Query builders ─────────────────────────────────────────────────────────

pub fn int4_var(rt_index: usize, attno: i32) -> Expr {
    Expr::var(rt_index, attno, ColumnType::int4())
}

pub fn param(id: i32) -> Expr {
    Expr::Param {
        kind: ParamKind::Extern,
        id,
        type_oid: INT4OID,
    }
}

pub fn relation(alias: &str, oid: Oid) -> RangeTableEntry {
    RangeTableEntry::relation(alias, RelationId(oid), &["id", "value"])
}

/// `SELECT id, value FROM <alias>`.
pub fn scan(alias: &str, oid: Oid) -> Query {
    let mut q = Query::select();
    let index = q.add_range_table_entry(relation(alias, oid));
    q.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
    q.target_list.push(TargetEntry::new(int4_var(index, 1), 1, "id"));
    q.target_list.push(TargetEntry::new(int4_var(index, 2), 2, "value"));
    q
}

/// `SELECT ... FROM <a> JOIN <b> ON a.id = b.id` over two range-table
/// entries; the output is the first entry's `id`.
pub fn join_query(join_type: JoinType, left: RangeTableEntry, right: RangeTableEntry) -> Query {
    let mut q = Query::select();
    let l = q.add_range_table_entry(left);
    let r = q.add_range_table_entry(right);
    q.join_tree.items.push(JoinTreeNode::join(
        join_type,
        JoinTreeNode::RangeTableRef(l),
        JoinTreeNode::RangeTableRef(r),
        Some(Expr::eq(int4_var(l, 1), int4_var(r, 1))),
    ));
    q.target_list.push(TargetEntry::new(int4_var(l, 1), 1, "id"));
    q
}

/// A subquery entry over `query`, already added to `tree`.
pub fn subquery_entry(tree: &mut QueryTree, alias: &str, query: Query) -> RangeTableEntry {
    let id = tree.add(query);
    RangeTableEntry::subquery(alias, id, &["id", "value"])
}

/// A statement whose root joins two entries built against the tree.
pub fn join_statement(
    join_type: JoinType,
    left: impl FnOnce(&mut QueryTree) -> RangeTableEntry,
    right: impl FnOnce(&mut QueryTree) -> RangeTableEntry,
) -> QueryTree {
    let mut tree = QueryTree::new(Query::select());
    let l = left(&mut tree);
    let r = right(&mut tree);
    *tree.root_query_mut() = join_query(join_type, l, r);
    tree
}

/// `<branch 1> <op> <branch 2> <op> ...` with each branch a subquery entry
/// of the returned query. The branches are added to `tree`.
pub fn set_operation_query(tree: &mut QueryTree, op: SetOperation, branches: Vec<Query>) -> Query {
    let mut query = Query::select();
    let mut leaves = Vec::new();
    for (i, branch) in branches.into_iter().enumerate() {
        let entry = subquery_entry(tree, &format!("u{}", i + 1), branch);
        let index = query.add_range_table_entry(entry);
        leaves.push(SetOperationTree::Leaf { rt_index: index });
    }
    let mut leaves = leaves.into_iter();
    let first = leaves.next().unwrap_or(SetOperationTree::Leaf { rt_index: 1 });
    let set_operations = leaves.fold(first, |acc, leaf| SetOperationTree::operation(op, false, acc, leaf));

    query.set_operations = Some(set_operations);
    query.target_list.push(TargetEntry::new(int4_var(1, 1), 1, "id"));
    query
}

/// A statement whose root is a set operation over `branches`.
pub fn set_operation_statement(op: SetOperation, branches: Vec<Query>) -> QueryTree {
    let mut tree = QueryTree::new(Query::select());
    let root = set_operation_query(&mut tree, op, branches);
    *tree.root_query_mut() = root;
    tree
}

/// `<branch 1> UNION <branch 2> UNION ...`.
pub fn union_statement(branches: Vec<Query>) -> QueryTree {
    set_operation_statement(SetOperation::Union, branches)
}

/// `SELECT id FROM (<branch 1> <op> <branch 2> ...) u`. The set operation
/// is the root's first range-table entry.
pub fn set_operation_in_from(op: SetOperation, branches: Vec<Query>) -> QueryTree {
    let mut tree = QueryTree::new(Query::select());
    let inner = set_operation_query(&mut tree, op, branches);
    let entry = subquery_entry(&mut tree, "u", inner);
    let root = tree.root_query_mut();
    let index = root.add_range_table_entry(entry);
    root.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
    root.target_list.push(TargetEntry::new(int4_var(index, 1), 1, "id"));
    tree
}

/// The materialized result `query` reads, if it is a result reader.
pub fn result_read_by(tree: &QueryTree, query: QueryId) -> Option<Expr> {
    tree.query(query).range_table.iter().find_map(|rte| match &rte.kind {
        RteKind::Function { functions } => functions.iter().find_map(|function| match &function.expr {
            Expr::Func { func_id, args, .. } if *func_id == READ_RESULT_FUNCTION => args.first().cloned(),
            _ => None,
        }),
        _ => None,
    })
}

/// `WITH <name> AS (<body>) SELECT id, value FROM <name>`.
pub fn cte_statement(name: &str, body: Query) -> QueryTree {
    let mut tree = QueryTree::new(Query::select());
    let body = tree.add(body);
    let root = tree.root_query_mut();
    root.cte_list.push(CommonTableExpr {
        name: name.to_string(),
        query: body,
    });
    let index = root.add_range_table_entry(RangeTableEntry::cte_reference(name, 0, &["id", "value"]));
    root.join_tree.items.push(JoinTreeNode::RangeTableRef(index));
    root.target_list.push(TargetEntry::new(int4_var(index, 1), 1, "id"));
    root.target_list.push(TargetEntry::new(int4_var(index, 2), 2, "value"));
    tree
}

/// Whether the query reads a materialized result.
pub fn reads_intermediate_result(tree: &QueryTree, query: QueryId) -> bool {
    walker::contains_function_call(tree, query, READ_RESULT_FUNCTION)
}
