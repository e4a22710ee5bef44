use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use planjson::{marshal, marshal_with, Data, EncodeOption, FieldDecl, InstructionCache, Type};

fn user_type() -> Type {
    Type::structure(
        "User",
        vec![
            FieldDecl::new("Id", Type::u32()).tag("id"),
            FieldDecl::new("Name", Type::string()).tag("name"),
            FieldDecl::new("Email", Type::string()).tag("email,omitempty"),
            FieldDecl::new("Active", Type::bool()).tag("active"),
            FieldDecl::new("Score", Type::f64()).tag("score"),
        ],
    )
}

fn user(i: u64) -> Data {
    Data::Struct(vec![
        Data::Uint(i),
        Data::from(format!("user-{}", i)),
        Data::from("alice@example.com"),
        Data::Bool(i % 2 == 0),
        Data::from(i as f64 * 1.25),
    ])
}

fn benchmark_encode_struct(c: &mut Criterion) {
    let ty = user_type();
    let data = user(123);
    c.bench_function("encode_simple_struct", |b| b.iter(|| marshal(black_box(&ty), black_box(&data))));
}

fn benchmark_encode_list(c: &mut Criterion) {
    let ty = Type::slice(&user_type());
    let mut group = c.benchmark_group("encode_struct_list");
    for size in [10u64, 100, 1000] {
        let data = Data::slice((0..size).map(user).collect());
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| marshal(black_box(&ty), black_box(data)))
        });
    }
    group.finish();
}

fn benchmark_encode_map(c: &mut Criterion) {
    let ty = Type::map(&Type::string(), &Type::i64());
    let data = Data::map(
        (0..256i64)
            .rev()
            .map(|i| (Data::from(format!("key-{:03}", i)), Data::Int(i)))
            .collect(),
    );
    let mut group = c.benchmark_group("encode_map");
    group.bench_function("sorted", |b| b.iter(|| marshal(black_box(&ty), black_box(&data))));
    group.bench_function("unsorted", |b| {
        b.iter(|| marshal_with(black_box(&ty), black_box(&data), &[EncodeOption::DisableMapSort]))
    });
    group.finish();
}

fn benchmark_compile(c: &mut Criterion) {
    c.bench_function("compile_fresh_cache", |b| {
        b.iter(|| {
            let cache = InstructionCache::new();
            cache.get(black_box(&user_type()))
        })
    });
}

criterion_group!(
    benches,
    benchmark_encode_struct,
    benchmark_encode_list,
    benchmark_encode_map,
    benchmark_compile
);
criterion_main!(benches);
