//! Plan model: the distributed plan descriptor, sub-plans, and the planned
//! statement handed back to the host engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::PlannerSettings;
use crate::error::{DeferredError, PlannerError};
use crate::query::{CommandType, QueryTree, RangeTableEntry, RelationId, TargetEntry};
use crate::serialization_check;

/// Identifier of one distributed planning attempt. Sub-plan results are
/// named after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub u64);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_PLAN_ID: AtomicU64 = AtomicU64::new(1);

/// Take the next plan id. Ids are unique for the lifetime of the process.
pub fn next_plan_id() -> PlanId {
    PlanId(NEXT_PLAN_ID.fetch_add(1, Ordering::Relaxed))
}

/// Who is planning: part of every intermediate result name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: u32,
    pub local_group_id: i32,
    pub process_id: i32,
}

impl SessionIdentity {
    /// The identity of a backend on the node configured in `settings`.
    pub fn for_backend(settings: &PlannerSettings, user_id: u32, process_id: i32) -> Self {
        SessionIdentity {
            user_id,
            local_group_id: settings.local_group_id,
            process_id,
        }
    }

    /// The identity of the current backend.
    #[cfg(feature = "pg18")]
    pub fn current(settings: &PlannerSettings) -> Self {
        // SAFETY: plain reads of backend-local globals set at backend start.
        let (user_id, process_id) = unsafe { (pgrx::pg_sys::GetUserId().to_u32(), pgrx::pg_sys::MyProcPid) };
        SessionIdentity::for_backend(settings, user_id, process_id)
    }
}

/// Location of the materialized result of one sub-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateResultId {
    pub session: SessionIdentity,
    pub plan_id: PlanId,
    pub sub_plan_id: u32,
}

impl fmt::Display for IntermediateResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base/pgsql_job_cache/{}_{}_{}_{}_{}.data",
            self.session.user_id,
            self.session.local_group_id,
            self.session.process_id,
            self.plan_id,
            self.sub_plan_id
        )
    }
}

/// An independently planned statement whose result is materialized and
/// read back by the enclosing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPlan {
    pub sub_plan_id: u32,
    pub result: IntermediateResultId,
    pub plan: Box<PlannedStatement>,
}

/// The set of tasks sent to the workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: u64,
    pub task_count: usize,
    /// Whether repartition jobs have to finish before this one.
    pub has_dependent_jobs: bool,
}

/// Descriptor of a distributed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedPlan {
    pub operation: CommandType,
    pub plan_id: Option<PlanId>,
    /// Whether the router executor can run the plan.
    pub router_executable: bool,
    pub worker_job: Option<Job>,
    /// Query run on the coordinator over the workers' results.
    pub master_query: Option<QueryTree>,
    /// Set for INSERT ... SELECT plans run through the coordinator.
    pub insert_select_query: Option<QueryTree>,
    pub sub_plans: Vec<SubPlan>,
    /// Relations to check permissions on at execution time.
    pub relation_ids: Vec<RelationId>,
    /// Raised when the plan is executed.
    pub planning_error: Option<DeferredError>,
    pub has_returning: bool,
}

impl DistributedPlan {
    pub fn new(operation: CommandType) -> Self {
        DistributedPlan {
            operation,
            plan_id: None,
            router_executable: false,
            worker_job: None,
            master_query: None,
            insert_select_query: None,
            sub_plans: Vec::new(),
            relation_ids: Vec::new(),
            planning_error: None,
            has_returning: false,
        }
    }

    /// A plan that only carries an error.
    pub fn with_error(operation: CommandType, error: DeferredError) -> Self {
        DistributedPlan {
            planning_error: Some(error),
            ..DistributedPlan::new(operation)
        }
    }

    pub fn is_multi_task(&self) -> bool {
        self.worker_job
            .as_ref()
            .map(|job| job.task_count > 1)
            .unwrap_or(false)
    }

    pub fn is_update_or_delete(&self) -> bool {
        matches!(self.operation, CommandType::Update | CommandType::Delete)
    }

    pub fn is_multi_shard_modify(&self) -> bool {
        self.is_update_or_delete() && self.is_multi_task()
    }
}

/// Strategy that runs a distributed plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorType {
    Router,
    RealTime,
    TaskTracker,
    CoordinatorInsertSelect,
    /// Raises the plan's deferred error when executed.
    DelayedError,
}

impl ExecutorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorType::Router => "Router",
            ExecutorType::RealTime => "Real-Time",
            ExecutorType::TaskTracker => "Task-Tracker",
            ExecutorType::CoordinatorInsertSelect => "Coordinator INSERT ... SELECT",
            ExecutorType::DelayedError => "Delayed Error",
        }
    }
}

/// Plan node that executes a distributed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedScan {
    pub executor: ExecutorType,
    pub plan: DistributedPlan,
    pub target_list: Vec<TargetEntry>,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    /// A plan produced by the host planner.
    Local {
        description: String,
        target_list: Vec<TargetEntry>,
        total_cost: f64,
    },
    DistributedScan(Box<DistributedScan>),
    /// Coordinator-side processing over a distributed scan.
    Combiner {
        target_list: Vec<TargetEntry>,
        child: Box<PlanNode>,
        total_cost: f64,
    },
}

impl PlanNode {
    pub fn total_cost(&self) -> f64 {
        match self {
            PlanNode::Local { total_cost, .. } | PlanNode::Combiner { total_cost, .. } => *total_cost,
            PlanNode::DistributedScan(scan) => scan.total_cost,
        }
    }

    pub fn set_total_cost(&mut self, cost: f64) {
        match self {
            PlanNode::Local { total_cost, .. } | PlanNode::Combiner { total_cost, .. } => *total_cost = cost,
            PlanNode::DistributedScan(scan) => scan.total_cost = cost,
        }
    }

    pub fn target_list(&self) -> &[TargetEntry] {
        match self {
            PlanNode::Local { target_list, .. } | PlanNode::Combiner { target_list, .. } => target_list,
            PlanNode::DistributedScan(scan) => &scan.target_list,
        }
    }

    /// The distributed scan at or directly below this node, if any.
    pub fn distributed_scan(&self) -> Option<&DistributedScan> {
        match self {
            PlanNode::Local { .. } => None,
            PlanNode::DistributedScan(scan) => Some(scan),
            PlanNode::Combiner { child, .. } => child.distributed_scan(),
        }
    }
}

/// An executable plan for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStatement {
    pub command: CommandType,
    pub plan_tree: PlanNode,
    pub range_table: Vec<RangeTableEntry>,
    /// Relations the plan depends on, for cache invalidation.
    pub relation_oids: Vec<RelationId>,
    pub query_id: u64,
    pub utility_statement: Option<String>,
    pub has_returning: bool,
    pub can_set_tag: bool,
}

impl PlannedStatement {
    pub fn new(command: CommandType, plan_tree: PlanNode) -> Self {
        PlannedStatement {
            command,
            plan_tree,
            range_table: Vec::new(),
            relation_oids: Vec::new(),
            query_id: 0,
            utility_statement: None,
            has_returning: false,
            can_set_tag: true,
        }
    }

    pub fn distributed_plan(&self) -> Option<&DistributedPlan> {
        self.plan_tree.distributed_scan().map(|scan| &scan.plan)
    }
}

/// A private copy of the descriptor held by a distributed scan.
///
/// Prepared statements reuse the scan across executions and the executor
/// modifies the descriptor it runs, so it always works on a copy.
pub fn get_distributed_plan(scan: &DistributedScan) -> Result<DistributedPlan, PlannerError> {
    serialization_check::check_node_copy_and_serialization(&scan.plan)
}
