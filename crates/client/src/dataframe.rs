use arrow::record_batch::RecordBatch;
use pfq_common::{PfqError, Result};
use pfq_execution::{ResultHandle, SendableRecordBatchStream};
use pfq_planner::{
    AddSchemaPrefix, AggExpr, Aggregate, Distinct, Expr, Folded, InnerJoin, KeyJoin, Limit,
    Operator, Project, Reorder, Select, Sort, SortKey, Union, ValueToSelectedPath,
};

use crate::session::SharedSession;

/// Operator tree under construction, bound to the engine that will run it.
#[derive(Debug, Clone)]
pub struct DataFrame {
    session: SharedSession,
    plan: Operator,
}

impl DataFrame {
    pub(crate) fn new(session: SharedSession, plan: Operator) -> Self {
        Self { session, plan }
    }

    pub fn plan(&self) -> &Operator {
        &self.plan
    }

    pub fn into_plan(self) -> Operator {
        self.plan
    }

    fn wrap(self, f: impl FnOnce(Box<Operator>) -> Operator) -> Self {
        Self::new(self.session, f(Box::new(self.plan)))
    }

    fn same_engine(&self, other: &DataFrame) -> Result<()> {
        if std::sync::Arc::ptr_eq(&self.session, &other.session) {
            Ok(())
        } else {
            Err(PfqError::Planning(
                "cannot combine DataFrames from different Engine instances".to_string(),
            ))
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        self.wrap(|input| Operator::Select(Select { input, predicate }))
    }

    /// Keep `key` and the columns matching `patterns`, in stored order.
    pub fn project(self, patterns: Vec<String>) -> Self {
        self.wrap(|input| {
            Operator::Project(Project {
                input,
                patterns,
                need_selected_path: false,
            })
        })
    }

    /// Like [`DataFrame::project`], but columns follow the pattern order.
    pub fn reorder(self, patterns: Vec<String>) -> Self {
        self.wrap(|input| {
            Operator::Reorder(Reorder {
                input,
                patterns,
                need_selected_path: false,
            })
        })
    }

    pub fn limit(self, limit: usize, offset: usize) -> Self {
        self.wrap(|input| Operator::Limit(Limit {
            input,
            limit,
            offset,
        }))
    }

    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        self.wrap(|input| Operator::Sort(Sort { input, keys }))
    }

    pub fn aggregate(self, aggs: Vec<(AggExpr, String)>) -> Self {
        self.wrap(|input| Operator::Aggregate(Aggregate { input, aggs }))
    }

    pub fn distinct(self) -> Self {
        self.wrap(|input| Operator::Distinct(Distinct { input }))
    }

    pub fn add_schema_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.wrap(|input| Operator::AddSchemaPrefix(AddSchemaPrefix { input, prefix }))
    }

    /// Turn the values of `column` into the `selected_path` marker column.
    pub fn selected_paths(self, column: impl Into<String>, prefix: impl Into<String>) -> Self {
        let column = column.into();
        let prefix = prefix.into();
        self.wrap(|input| {
            Operator::ValueToSelectedPath(ValueToSelectedPath {
                input,
                column,
                prefix,
            })
        })
    }

    /// Full outer join on `key`.
    pub fn key_join(self, right: DataFrame) -> Result<Self> {
        self.same_engine(&right)?;
        Ok(self.wrap(|left| {
            Operator::KeyJoin(KeyJoin {
                left,
                right: Box::new(right.plan),
            })
        }))
    }

    pub fn join(
        self,
        right: DataFrame,
        left_on: impl Into<String>,
        right_on: impl Into<String>,
    ) -> Result<Self> {
        self.same_engine(&right)?;
        let left_on = left_on.into();
        let right_on = right_on.into();
        Ok(self.wrap(|left| {
            Operator::InnerJoin(InnerJoin {
                left,
                right: Box::new(right.plan),
                left_on,
                right_on,
            })
        }))
    }

    pub fn union(self, others: Vec<DataFrame>) -> Result<Self> {
        for other in &others {
            self.same_engine(other)?;
        }
        let mut inputs = vec![self.plan];
        inputs.extend(others.into_iter().map(|df| df.plan));
        Ok(Self::new(self.session, Operator::Union(Union { inputs })))
    }

    /// Defer `template` until this frame's `selected_path` values are known.
    pub fn fold_into(self, template: Operator) -> Self {
        Self::new(
            self.session,
            Operator::Folded(Folded {
                inputs: vec![self.plan],
                folded_root: Box::new(template),
            }),
        )
    }

    pub fn explain(&self) -> Result<String> {
        self.session.explain(&self.plan)
    }

    pub fn submit(&self) -> Result<ResultHandle> {
        self.session.submit(&self.plan)
    }

    pub async fn collect(&self) -> Result<Vec<RecordBatch>> {
        self.session.collect(&self.plan).await
    }

    pub async fn execute_stream(&self) -> Result<SendableRecordBatchStream> {
        self.session.execute_stream(&self.plan).await
    }
}
