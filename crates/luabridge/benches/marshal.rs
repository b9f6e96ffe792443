use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use luabridge::{State, Value};

fn bench_primitives(c: &mut Criterion) {
    let lua = State::new().unwrap();
    let mut group = c.benchmark_group("primitives");

    let cases = [
        ("integer", Value::Integer(42)),
        ("float", Value::Number(3.25)),
        ("string", Value::from("the quick brown fox")),
    ];
    for (name, value) in cases {
        group.bench_with_input(BenchmarkId::new("round_trip", name), &value, |b, value| {
            b.iter(|| lua.create_value(black_box(value.clone())).unwrap());
        });
    }

    group.finish();
}

fn bench_tables(c: &mut Criterion) {
    let lua = State::new().unwrap();
    let mut group = c.benchmark_group("tables");

    for size in [16usize, 256] {
        let literal = Value::array(0..size as i64);
        group.bench_with_input(BenchmarkId::new("push_array", size), &literal, |b, literal| {
            b.iter(|| lua.create_value(black_box(literal.clone())).unwrap());
        });

        let table = lua.create_value(literal).unwrap().into_table().unwrap();
        group.bench_with_input(BenchmarkId::new("to_sequence", size), &table, |b, table| {
            b.iter(|| table.to_sequence().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("pairs", size), &table, |b, table| {
            b.iter(|| table.pairs().count());
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let lua = State::new().unwrap();
    lua.eval("function add(a, b) return a + b end t = { v = 1 }").unwrap();

    c.bench_function("invoke_global", |b| {
        b.iter(|| lua.invoke("add", [black_box(1), black_box(2)]).unwrap());
    });

    let t = lua.get("t").unwrap().into_table().unwrap();
    c.bench_function("table_get", |b| {
        b.iter(|| t.get(black_box("v")).unwrap());
    });
}

criterion_group!(benches, bench_primitives, bench_tables, bench_dispatch);
criterion_main!(benches);
