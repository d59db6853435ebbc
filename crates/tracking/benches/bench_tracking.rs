use std::hint::black_box;
use std::time::Instant;

use tickspace_common::{EntityId, Point};
use tickspace_tracking::{
    ChunkIndex, EntityKind, EntityTracking, Synchronized, Target, TrackedEntity, VisibilitySet,
};

fn populate(entity_count: usize, spacing: f64) -> (ChunkIndex, Vec<(EntityId, Point)>) {
    let mut index = ChunkIndex::new(8).unwrap();
    let side = (entity_count as f64).sqrt().ceil() as usize;
    let mut placed = Vec::with_capacity(entity_count);
    for i in 0..entity_count {
        let x = (i % side) as f64 * spacing;
        let z = (i / side) as f64 * spacing;
        let id = EntityId::new();
        let kind = if i % 10 == 0 {
            EntityKind::Player
        } else {
            EntityKind::Entity
        };
        let at = Point::new(x, 64.0, z);
        index
            .register(id, kind, at, &mut ())
            .expect("fresh ids register");
        placed.push((id, at));
    }
    (index, placed)
}

fn bench_move(entity_count: usize, iterations: usize) {
    let (mut index, placed) = populate(entity_count, 4.0);
    let mut positions: Vec<Point> = placed.iter().map(|(_, p)| *p).collect();

    let start = Instant::now();
    for i in 0..iterations {
        let slot = i % placed.len();
        let old = positions[slot];
        let new = old + Point::new(if i % 2 == 0 { 9.0 } else { -9.0 }, 0.0, 3.0);
        let mut updates = VisibilitySet::new();
        index
            .move_entity(placed[slot].0, old, new, &mut updates)
            .expect("tracked entity moves");
        black_box(&updates);
        positions[slot] = new;
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  move ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_difference(entity_count: usize, iterations: usize) {
    let (index, _) = populate(entity_count, 4.0);

    let start = Instant::now();
    for i in 0..iterations {
        let from = Point::new((i % 32) as f64 * 16.0, 64.0, 0.0);
        let to = from + Point::new(16.0, 0.0, 16.0);
        let mut diff = VisibilitySet::new();
        index.difference(black_box(from), black_box(to), Target::Entities, &mut diff);
        black_box(diff);
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  view diff ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_nearby(entity_count: usize, range: f64, iterations: usize) {
    let (index, _) = populate(entity_count, 4.0);
    let center = Point::new(64.0, 64.0, 64.0);

    let start = Instant::now();
    for _ in 0..iterations {
        let mut found = 0usize;
        index.nearby_entities(
            black_box(center),
            black_box(range),
            Target::Entities,
            &mut |_: &TrackedEntity| found += 1,
        );
        black_box(found);
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  nearby ({entity_count} entities, r={range}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_synchronized_visible(entity_count: usize, iterations: usize) {
    let (index, _) = populate(entity_count, 4.0);
    let tracker = Synchronized::new(index);
    let center = Point::new(0.0, 64.0, 0.0);

    let start = Instant::now();
    for _ in 0..iterations {
        let mut found = 0usize;
        tracker.visible_entities(black_box(center), Target::Players, &mut |_: &TrackedEntity| {
            found += 1
        });
        black_box(found);
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  synchronized visible ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Entity Tracking Benchmarks ===\n");

    println!("Move (chunk crossings with viewer updates):");
    bench_move(100, 10000);
    bench_move(1000, 10000);
    bench_move(10000, 10000);

    println!("\nView-distance diff:");
    bench_difference(1000, 1000);
    bench_difference(10000, 100);

    println!("\nNearby query:");
    bench_nearby(1000, 8.0, 10000);
    bench_nearby(1000, 32.0, 10000);
    bench_nearby(10000, 64.0, 1000);

    println!("\nSynchronized visible query:");
    bench_synchronized_visible(1000, 10000);

    println!("\n=== Done ===");
}
