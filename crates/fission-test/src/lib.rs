//! Shared fixtures for the FissionDB integration tests.
//!
//! Catalog and plan builders used by both the in-process engine scenarios
//! and the wire-protocol session tests.

use fission_catalog::{CatalogSpec, ColumnSpec, TableSpec, ViewSpec};
use fission_codec::rowcodec;
use fission_codec::SerializeInput;
use fission_common::types::{CatalogVersion, DataType, PartitionId, SiteId, TableId};
use fission_common::{Row, Value};
use fission_engine::{EngineConfig, InProcessTopend, PartitionEngine};
use fission_plan::{AggregateOp, AggregateSpec, CompareOp, Expr, PlanFragment, PlanNode};

/// `pairs(a INT PRIMARY KEY, b INT)`, the plain two-column table.
pub fn pairs_table() -> TableSpec {
    TableSpec {
        name: "pairs".to_string(),
        table_id: TableId::new(0),
        signature: "pairs|int:a,int:b".to_string(),
        is_replicated: false,
        is_streamed: false,
        columns: vec![
            ColumnSpec::not_null("a", DataType::Int),
            ColumnSpec::nullable("b", DataType::Int),
        ],
        primary_key: vec![0],
        indexes: vec![],
        view: None,
    }
}

/// Catalog holding only [`pairs_table`].
pub fn pairs_catalog() -> CatalogSpec {
    CatalogSpec {
        tables: vec![pairs_table()],
    }
}

/// `samples(g INT, v INT)` plus the grouped view
/// `samples_agg AS SELECT g, COUNT(*), SUM(v), MIN(v), MAX(v) GROUP BY g`.
pub fn grouped_view_catalog() -> CatalogSpec {
    let source = TableSpec {
        name: "samples".to_string(),
        table_id: TableId::new(0),
        signature: "samples|int:g,int:v".to_string(),
        is_replicated: false,
        is_streamed: false,
        columns: vec![
            ColumnSpec::not_null("g", DataType::Int),
            ColumnSpec::nullable("v", DataType::Int),
        ],
        primary_key: vec![],
        indexes: vec![],
        view: None,
    };

    let create_query = PlanFragment::new(vec![
        PlanNode::SeqScan {
            table: "samples".to_string(),
            predicate: None,
        },
        PlanNode::Aggregate {
            group_by: vec![0],
            aggregates: vec![
                AggregateSpec::new(AggregateOp::CountStar, None),
                AggregateSpec::new(AggregateOp::Sum, Some(1)),
                AggregateSpec::new(AggregateOp::Min, Some(1)),
                AggregateSpec::new(AggregateOp::Max, Some(1)),
            ],
        },
        PlanNode::Send,
    ]);

    let fallback = |op: AggregateOp| {
        PlanFragment::new(vec![
            PlanNode::SeqScan {
                table: "samples".to_string(),
                predicate: Some(Expr::column_eq_param(0, 0)),
            },
            PlanNode::Aggregate {
                group_by: vec![],
                aggregates: vec![AggregateSpec::new(op, Some(1))],
            },
            PlanNode::Send,
        ])
    };

    let view = TableSpec {
        name: "samples_agg".to_string(),
        table_id: TableId::new(1),
        signature: "samples_agg|int:g,bigint:cnt,int:total,int:low,int:high".to_string(),
        is_replicated: false,
        is_streamed: false,
        columns: vec![
            ColumnSpec::not_null("g", DataType::Int),
            ColumnSpec::nullable("cnt", DataType::BigInt),
            ColumnSpec::nullable("total", DataType::Int),
            ColumnSpec::nullable("low", DataType::Int),
            ColumnSpec::nullable("high", DataType::Int),
        ],
        primary_key: vec![0],
        indexes: vec![],
        view: Some(ViewSpec {
            source_tables: vec!["samples".to_string()],
            group_by_count: 1,
            aggregates: vec![
                AggregateSpec::new(AggregateOp::CountStar, None),
                AggregateSpec::new(AggregateOp::Sum, Some(1)),
                AggregateSpec::new(AggregateOp::Min, Some(1)),
                AggregateSpec::new(AggregateOp::Max, Some(1)),
            ],
            create_query,
            fallback_queries: vec![fallback(AggregateOp::Min), fallback(AggregateOp::Max)],
        }),
    };

    CatalogSpec {
        tables: vec![source, view],
    }
}

/// `samples(g INT, v INT)` plus the group-by-less view
/// `samples_total AS SELECT COUNT(*), SUM(v)`.
pub fn ungrouped_view_catalog() -> CatalogSpec {
    let mut catalog = grouped_view_catalog();
    catalog.tables.truncate(1);

    let create_query = PlanFragment::new(vec![
        PlanNode::SeqScan {
            table: "samples".to_string(),
            predicate: None,
        },
        PlanNode::Aggregate {
            group_by: vec![],
            aggregates: vec![
                AggregateSpec::new(AggregateOp::CountStar, None),
                AggregateSpec::new(AggregateOp::Sum, Some(1)),
            ],
        },
        PlanNode::Send,
    ]);
    catalog.tables.push(TableSpec {
        name: "samples_total".to_string(),
        table_id: TableId::new(1),
        signature: "samples_total|bigint:cnt,int:total".to_string(),
        is_replicated: false,
        is_streamed: false,
        columns: vec![
            ColumnSpec::nullable("cnt", DataType::BigInt),
            ColumnSpec::nullable("total", DataType::Int),
        ],
        primary_key: vec![],
        indexes: vec![],
        view: Some(ViewSpec {
            source_tables: vec!["samples".to_string()],
            group_by_count: 0,
            aggregates: vec![
                AggregateSpec::new(AggregateOp::CountStar, None),
                AggregateSpec::new(AggregateOp::Sum, Some(1)),
            ],
            create_query,
            fallback_queries: vec![],
        }),
    });
    catalog
}

/// `SELECT * FROM table`.
pub fn scan_fragment(table: &str) -> PlanFragment {
    PlanFragment::new(vec![
        PlanNode::SeqScan {
            table: table.to_string(),
            predicate: None,
        },
        PlanNode::Send,
    ])
}

/// `INSERT INTO table VALUES rows`.
pub fn insert_values_fragment(table: &str, rows: Vec<Vec<Value>>) -> PlanFragment {
    PlanFragment::new(vec![
        PlanNode::Materialize {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Expr::Literal).collect())
                .collect(),
        },
        PlanNode::Insert {
            table: table.to_string(),
        },
        PlanNode::Send,
    ])
}

/// `DELETE FROM table WHERE col0 = a AND col1 = b` for a two-column table.
pub fn delete_pair_fragment(table: &str, a: Value, b: Value) -> PlanFragment {
    let predicate = Expr::And(
        Box::new(Expr::Compare {
            op: CompareOp::Eq,
            left: Box::new(Expr::Column(0)),
            right: Box::new(Expr::Literal(a)),
        }),
        Box::new(Expr::Compare {
            op: CompareOp::Eq,
            left: Box::new(Expr::Column(1)),
            right: Box::new(Expr::Literal(b)),
        }),
    );
    PlanFragment::new(vec![
        PlanNode::SeqScan {
            table: table.to_string(),
            predicate: Some(predicate),
        },
        PlanNode::Delete {
            table: table.to_string(),
        },
        PlanNode::Send,
    ])
}

/// Boots an initialized engine over an in-process host and loads the
/// catalog at version 1.
pub fn boot_engine(catalog: &CatalogSpec) -> (PartitionEngine, InProcessTopend) {
    let topend = InProcessTopend::new();
    let mut engine = PartitionEngine::new(Box::new(topend.clone()), EngineConfig::default());
    engine
        .initialize(
            0,
            SiteId::new(0),
            PartitionId::new(0),
            0,
            true,
            0,
            "test-host",
        )
        .expect("initialize");
    let payload = serde_json::to_vec(catalog).expect("serialize catalog");
    engine
        .load_catalog(CatalogVersion::new(1), &payload)
        .expect("load catalog");
    (engine, topend)
}

/// Decodes the engine's result buffer into `(dep_id, rows)` sets.
pub fn decode_results(results: &[u8]) -> Vec<(i32, Vec<Row>)> {
    let mut input = SerializeInput::new(results);
    let mut sets = Vec::new();
    while input.remaining() > 0 {
        sets.push(rowcodec::read_result_set(&mut input).expect("result set"));
    }
    sets
}

/// Sorts rows for order-insensitive comparison.
pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by(|a, b| a.values().cmp(b.values()));
    rows
}

/// Builds a two-int-column row.
pub fn pair(a: i32, b: i32) -> Row {
    Row::new(vec![Value::Int(a), Value::Int(b)])
}
