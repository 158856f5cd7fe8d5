use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use insight_engine::{
    ColumnDef, ColumnRef, DataModel, Deviation, DrillConfig, DrillPath, FilterContext,
    ForeignKey, Measure, MeasureExpr, ModelBuilder, Table, TableSchema, Value,
};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("INSIGHT_ENGINE_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (10_000..=2_000_000).contains(&v))
        .unwrap_or(200_000)
}

fn build_star_schema_model(rows: usize) -> DataModel {
    // Few groups (region x category) over a wide fact so the bench measures scan cost.
    let customers = 5_000i64;
    let products = 1_000i64;
    let regions = 5i64;
    let categories = 4i64;

    let customers_schema = TableSchema::dimension(
        "Customers",
        vec![ColumnDef::key("CustomerId"), ColumnDef::text("Region")],
        "CustomerId",
    );
    let customers_table = Table::with_rows(
        "Customers",
        vec!["CustomerId", "Region"],
        (0..customers).map(|id| {
            vec![
                Value::from(id),
                Value::from(format!("Region_{:02}", id % regions)),
            ]
        }),
    )
    .unwrap();

    let products_schema = TableSchema::dimension(
        "Products",
        vec![ColumnDef::key("ProductId"), ColumnDef::text("Category")],
        "ProductId",
    );
    let products_table = Table::with_rows(
        "Products",
        vec!["ProductId", "Category"],
        (0..products).map(|id| {
            vec![
                Value::from(id),
                Value::from(format!("Category_{:02}", id % categories)),
            ]
        }),
    )
    .unwrap();

    let contacts_schema = TableSchema::fact(
        "Contacts",
        vec![
            ColumnDef::key("CustomerId"),
            ColumnDef::key("ProductId"),
            ColumnDef::number("CsatScore"),
        ],
    )
    .with_foreign_key(ForeignKey::new(
        "Contacts_Customers",
        "CustomerId",
        "Customers",
        "CustomerId",
    ))
    .with_foreign_key(ForeignKey::new(
        "Contacts_Products",
        "ProductId",
        "Products",
        "ProductId",
    ));
    let contacts_table = Table::with_rows(
        "Contacts",
        vec!["CustomerId", "ProductId", "CsatScore"],
        (0..rows).map(|i| {
            let customer_id = i as i64 % customers;
            // Mix the product id to avoid perfectly-aligned stripes across dimensions.
            let product_id = (i as i64).wrapping_mul(13) % products;
            let score = ((i / 7) % 5 + 1) as f64;
            vec![customer_id.into(), product_id.into(), score.into()]
        }),
    )
    .unwrap();

    let mut builder = ModelBuilder::new();
    builder.add_table(customers_schema, customers_table).unwrap();
    builder.add_table(products_schema, products_table).unwrap();
    builder.add_table(contacts_schema, contacts_table).unwrap();
    builder
        .add_measure(Measure::new(
            "# Responses",
            MeasureExpr::count("Contacts", "CsatScore"),
        ))
        .unwrap();
    builder
        .add_measure(Measure::new(
            "# DSAT",
            MeasureExpr::filtered(
                MeasureExpr::count("Contacts", "CsatScore"),
                vec![insight_engine::ColumnFilter::new(
                    ColumnRef::new("Contacts", "CsatScore"),
                    insight_engine::Predicate::at_most(2),
                )],
            ),
        ))
        .unwrap();
    builder
        .add_measure(Measure::new(
            "% DSAT",
            MeasureExpr::ratio(
                MeasureExpr::measure("# DSAT"),
                MeasureExpr::measure("# Responses"),
            ),
        ))
        .unwrap();
    builder.build().unwrap()
}

fn bench_grouped_star_schema(c: &mut Criterion) {
    let rows = bench_rows();
    let model = build_star_schema_model(rows);
    let group_by = vec![
        ColumnRef::new("Customers", "Region"),
        ColumnRef::new("Products", "Category"),
    ];

    let result = model
        .evaluate_grouped("% DSAT", &group_by, &FilterContext::empty())
        .unwrap();
    assert_eq!(result.rows.len(), 20);

    let mut group = c.benchmark_group("grouped_star_schema");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    group.bench_with_input(BenchmarkId::new("scalar_ratio", rows), &rows, |b, _| {
        b.iter(|| {
            let value = model.evaluate("% DSAT", &FilterContext::empty()).unwrap();
            black_box(value);
        })
    });

    group.bench_with_input(BenchmarkId::new("dimension_group_by", rows), &rows, |b, _| {
        b.iter(|| {
            let result = model
                .evaluate_grouped("% DSAT", &group_by, &FilterContext::empty())
                .unwrap();
            black_box(result);
        })
    });

    let path = DrillPath::new(group_by.clone());
    let deviation = Deviation::RateAboveGoal { goal: 0.3 };
    let config = DrillConfig::default();
    group.bench_with_input(BenchmarkId::new("drill_two_levels", rows), &rows, |b, _| {
        b.iter(|| {
            let outcome = model
                .drill("% DSAT", &FilterContext::empty(), &path, &deviation, &config)
                .unwrap();
            black_box(outcome);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_grouped_star_schema);
criterion_main!(benches);
