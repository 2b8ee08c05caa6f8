use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use convnet_device::{CommandQueue, ExecutionStrategy};
use convnet_layers::{
    ConvLayerConfig, ConvolutionalLayer, ForwardMode, Initialization, InputLayer,
};
use rand::{rngs::StdRng, SeedableRng};

const MINI_BATCH: usize = 32;

fn build_layer(
    strategy: ExecutionStrategy,
    (depth, side): (usize, usize),
) -> (InputLayer, ConvolutionalLayer) {
    let queue = CommandQueue::new(strategy).unwrap();
    let input = InputLayer::new(&queue, depth, side, side, MINI_BATCH).unwrap();
    let mut layer = ConvolutionalLayer::new(ConvLayerConfig::new(5, 16).with_padding(2), &queue);
    layer.connect_to(&input).unwrap();
    layer
        .initialize_parameters(Initialization::Random, &mut StdRng::seed_from_u64(0))
        .unwrap();
    input
        .feed(&vec![0.5; MINI_BATCH * depth * side * side])
        .unwrap();
    (input, layer)
}

fn bench_convolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("Convolution");
    group.sample_size(20);

    for (depth, side) in [(1, 28), (3, 32), (16, 16)].iter() {
        let units = MINI_BATCH * depth * side * side;
        group.throughput(criterion::Throughput::Elements(units as u64));

        let parameter_string = format!("{}x{}x{}", depth, side, side);

        for (name, strategy) in [
            ("serial", ExecutionStrategy::Serial),
            ("parallel", ExecutionStrategy::ParallelElements),
        ] {
            let (_input, mut layer) = build_layer(strategy, (*depth, *side));

            group.bench_with_input(
                BenchmarkId::new(format!("forward_{name}"), &parameter_string),
                &ForwardMode::Inference,
                |b, mode| b.iter(|| black_box(layer.feed_forward(*mode)).unwrap()),
            );

            let deltas = vec![0.1; MINI_BATCH * 16 * side * side];
            layer.write_output_delta(&deltas).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("backward_{name}"), &parameter_string),
                &(),
                |b, _| b.iter(|| black_box(layer.back_propagate()).unwrap()),
            );

            group.bench_with_input(
                BenchmarkId::new(format!("gradients_{name}"), &parameter_string),
                &(),
                |b, _| b.iter(|| black_box(layer.compute_parameter_gradients()).unwrap()),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_convolution);
criterion_main!(benches);
