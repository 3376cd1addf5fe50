//! Performance benchmarks for dependency resolution and assembly.
//!
//! Run with: `cargo bench --bench resolution`
//!
//! ## Scenarios
//!
//! | Shape | What it stresses |
//! |-------|------------------|
//! | Chain | Deep path stack, on-path set growth |
//! | Fan-out | Many siblings per frame |
//! | Diamond lattice | Repeated declarations of already resolved libraries |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::Arc;

use knowledge_bundler::{
    assemble, ArtifactIdentity, ArtifactRecord, ArtifactStore, DependencyResolver,
    InMemoryArtifactStore, RepositoryLayout,
};

fn library_json(name: &str, deps: &[String]) -> String {
    let related: Vec<String> = deps
        .iter()
        .map(|d| format!(r#"{{"type":"depends-on","resource":"http://example.org/Library/{}"}}"#, d))
        .collect();
    format!(
        r#"{{"resourceType":"Library","id":"{0}","name":"{0}","relatedArtifact":[{1}]}}"#,
        name,
        related.join(",")
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// L0 → L1 → ... → L(n-1)
fn chain_store(n: usize) -> Arc<InMemoryArtifactStore> {
    let layout = RepositoryLayout::new("/ig");
    let dir = layout.libraries_dir();
    let mut store = InMemoryArtifactStore::new(layout);
    for i in 0..n {
        let deps = if i + 1 < n { vec![format!("L{}", i + 1)] } else { vec![] };
        store.add_file(dir.join(format!("library-L{}.json", i)), library_json(&format!("L{}", i), &deps));
    }
    Arc::new(store)
}

/// Root depends on n leaves.
fn fan_out_store(n: usize) -> Arc<InMemoryArtifactStore> {
    let layout = RepositoryLayout::new("/ig");
    let dir = layout.libraries_dir();
    let mut store = InMemoryArtifactStore::new(layout);
    let leaves: Vec<String> = (0..n).map(|i| format!("Leaf{}", i)).collect();
    store.add_file(dir.join("library-L0.json"), library_json("L0", &leaves));
    for leaf in &leaves {
        store.add_file(dir.join(format!("library-{}.json", leaf)), library_json(leaf, &[]));
    }
    Arc::new(store)
}

/// Layers of `width` libraries, each depending on every library of the next layer.
fn lattice_store(depth: usize, width: usize) -> Arc<InMemoryArtifactStore> {
    let layout = RepositoryLayout::new("/ig");
    let dir = layout.libraries_dir();
    let mut store = InMemoryArtifactStore::new(layout);

    let name = |layer: usize, i: usize| format!("D{}x{}", layer, i);
    let first: Vec<String> = (0..width).map(|i| name(0, i)).collect();
    store.add_file(dir.join("library-L0.json"), library_json("L0", &first));

    for layer in 0..depth {
        let next: Vec<String> = if layer + 1 < depth {
            (0..width).map(|i| name(layer + 1, i)).collect()
        } else {
            vec![]
        };
        for i in 0..width {
            let lib = name(layer, i);
            store.add_file(dir.join(format!("library-{}.json", lib)), library_json(&lib, &next));
        }
    }
    Arc::new(store)
}

fn root_record(store: &InMemoryArtifactStore, rt: &tokio::runtime::Runtime) -> ArtifactRecord {
    let path = store.layout().libraries_dir().join("library-L0.json");
    rt.block_on(store.load(&path, None)).unwrap()
}

/// Benchmark resolution over a deep chain.
fn bench_chain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("resolve_chain");

    for depth in [10, 100, 500] {
        let store = chain_store(depth);
        let root = root_record(&store, &rt);
        let resolver = DependencyResolver::new(store);

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("depth", depth), &root, |b, root| {
            b.iter(|| {
                let result = rt.block_on(resolver.resolve_record(black_box(root)));
                assert!(result.succeeded());
                result
            })
        });
    }

    group.finish();
}

/// Benchmark resolution with many siblings.
fn bench_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("resolve_fan_out");

    for width in [10, 100, 500] {
        let store = fan_out_store(width);
        let root = root_record(&store, &rt);
        let resolver = DependencyResolver::new(store);

        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("width", width), &root, |b, root| {
            b.iter(|| rt.block_on(resolver.resolve_record(black_box(root))))
        });
    }

    group.finish();
}

/// Benchmark resolution where most declarations are already resolved.
fn bench_lattice(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("resolve_lattice");

    for (depth, width) in [(5, 5), (10, 10)] {
        let store = lattice_store(depth, width);
        let root = root_record(&store, &rt);
        let resolver = DependencyResolver::new(store);

        group.bench_with_input(
            BenchmarkId::new("layers", format!("{}x{}", depth, width)),
            &root,
            |b, root| {
                b.iter(|| {
                    let result = rt.block_on(resolver.resolve_record(black_box(root)));
                    assert_eq!(result.len(), depth * width);
                    result
                })
            },
        );
    }

    group.finish();
}

/// Benchmark bundle assembly from a resolved closure.
fn bench_assemble(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("assemble");

    for width in [10, 100, 500] {
        let store = fan_out_store(width);
        let root = root_record(&store, &rt);
        let resolver = DependencyResolver::new(store);
        let mut resources: BTreeMap<ArtifactIdentity, ArtifactRecord> =
            rt.block_on(resolver.resolve_record(&root)).closure;
        resources.insert(root.identity.clone(), root);

        group.throughput(Throughput::Elements(resources.len() as u64));
        group.bench_with_input(BenchmarkId::new("entries", width), &resources, |b, resources| {
            b.iter(|| assemble("L0-bundle", black_box(resources)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_lattice, bench_assemble);
criterion_main!(benches);
