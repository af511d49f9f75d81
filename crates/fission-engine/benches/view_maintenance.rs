//! Benchmarks the incremental view-maintenance insert path.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use fission_catalog::{CatalogSpec, ColumnSpec, TableSpec, ViewSpec};
use fission_common::types::{CatalogVersion, DataType, PartitionId, SiteId, TableId, UndoToken};
use fission_common::{Row, Value};
use fission_engine::{EngineConfig, InProcessTopend, PartitionEngine};
use fission_plan::{AggregateOp, AggregateSpec, Expr, PlanFragment, PlanNode};

fn bench_catalog() -> Vec<u8> {
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
            ],
        },
        PlanNode::Send,
    ]);
    let min_fallback = PlanFragment::new(vec![
        PlanNode::SeqScan {
            table: "samples".to_string(),
            predicate: Some(Expr::column_eq_param(0, 0)),
        },
        PlanNode::Aggregate {
            group_by: vec![],
            aggregates: vec![AggregateSpec::new(AggregateOp::Min, Some(1))],
        },
        PlanNode::Send,
    ]);
    let view = TableSpec {
        name: "samples_by_group".to_string(),
        table_id: TableId::new(1),
        signature: "samples_by_group|int:g,bigint:cnt,int:total,int:low".to_string(),
        is_replicated: false,
        is_streamed: false,
        columns: vec![
            ColumnSpec::not_null("g", DataType::Int),
            ColumnSpec::nullable("cnt", DataType::BigInt),
            ColumnSpec::nullable("total", DataType::Int),
            ColumnSpec::nullable("low", DataType::Int),
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
            ],
            create_query,
            fallback_queries: vec![min_fallback],
        }),
    };
    serde_json::to_vec(&CatalogSpec {
        tables: vec![source, view],
    })
    .unwrap()
}

fn fresh_engine() -> PartitionEngine {
    let mut engine =
        PartitionEngine::new(Box::new(InProcessTopend::new()), EngineConfig::default());
    engine
        .initialize(
            0,
            SiteId::new(0),
            PartitionId::new(0),
            0,
            true,
            0,
            "bench",
        )
        .unwrap();
    engine
        .load_catalog(CatalogVersion::new(1), &bench_catalog())
        .unwrap();
    engine
}

fn payload(rows: usize) -> Vec<u8> {
    let rows: Vec<Row> = (0..rows)
        .map(|i| Row::new(vec![Value::Int((i % 16) as i32), Value::Int(i as i32)]))
        .collect();
    fission_codec::rowcodec::encode_table_payload(&[DataType::Int, DataType::Int], &rows)
}

fn bench_view_insert(c: &mut Criterion) {
    let payload = payload(256);
    c.bench_function("view_maintenance_insert_256", |b| {
        b.iter_batched(
            fresh_engine,
            |mut engine| {
                engine
                    .load_table(TableId::new(0), &payload, UndoToken::NONE)
                    .unwrap();
                engine
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_view_insert);
criterion_main!(benches);
