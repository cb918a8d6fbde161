use criterion::{criterion_group, criterion_main, Criterion};
use interactive_kernel::{
    engine::script::parser::parse_script, Kernel, KernelCommand, KernelConfig,
};

fn bench_parse(c: &mut Criterion) {
    let code = r#"
for ($j = 0; $j -le 100; $j += 10 ) {
    $p = $j * 25
    Write-Progress -Id 1 -Activity 'Search in Progress' -Status "$p% Complete" -PercentComplete $p
}
$m = [pscustomobject]@{ prop1 = 'value1'; prop2 = 'value2' }
$m | Out-Display
"#;
    c.bench_function("parse script", |b| b.iter(|| parse_script(code)));
}

fn bench_submit(c: &mut Criterion) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => panic!("Failed to build runtime: {}", e),
    };
    let kernel = Kernel::script(KernelConfig::default());

    c.bench_function("submit echo", |b| {
        b.to_async(&runtime)
            .iter(|| kernel.send(KernelCommand::submit_code("$x = 1 + 2; echo $x")))
    });
    c.bench_function("request value infos", |b| {
        b.to_async(&runtime)
            .iter(|| kernel.request_value_infos())
    });
}

criterion_group!(benches, bench_parse, bench_submit);
criterion_main!(benches);
