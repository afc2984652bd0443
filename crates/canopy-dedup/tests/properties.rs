use canopy_core::{Detection, TileId};
use canopy_dedup::{deduplicate, DedupParams};

/// Deterministic scatter of detections with a few tight duplicate groups.
fn scatter(n: usize, seed: u64) -> Vec<Detection> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };

    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let x = next() * 4000.0;
        let y = next() * 3000.0;
        let copies = 1 + (next() * 3.0) as usize;
        for k in 0..copies {
            out.push(Detection {
                tile: TileId::new(format!("tile_{}", out.len() % 7)),
                class: if next() < 0.5 { "Oil Palm" } else { "VOP" }.to_owned(),
                confidence: (next() * 1000.0).round() / 1000.0,
                x: x + k as f64 * 2.5,
                y: y - k as f64 * 1.5,
                width: 40.0,
                height: 40.0,
            });
        }
    }
    out.truncate(n);
    out
}

#[test]
fn deduplication_is_idempotent() {
    let dets = scatter(2_000, 7);
    let params = DedupParams::new(12.0).unwrap();
    let once = deduplicate(&dets, params);
    let twice = deduplicate(&once.detections, params);
    assert_eq!(twice.detections, once.detections);
    assert!(once.detections.len() < dets.len());
}

#[test]
fn kept_detections_are_farther_than_eps_apart() {
    let dets = scatter(800, 11);
    let eps = 9.0;
    let res = deduplicate(&dets, DedupParams::new(eps).unwrap());
    for (i, a) in res.detections.iter().enumerate() {
        for b in &res.detections[i + 1..] {
            assert!((a.center() - b.center()).norm() > eps);
        }
    }
}

#[test]
fn tiny_eps_keeps_every_distinct_detection() {
    let dets: Vec<Detection> = scatter(500, 3)
        .into_iter()
        .enumerate()
        .map(|(i, mut d)| {
            // Force pairwise-distinct centers.
            d.x = i as f64 * 0.5;
            d
        })
        .collect();
    let res = deduplicate(&dets, DedupParams::new(f64::MIN_POSITIVE).unwrap());
    assert_eq!(res.detections.len(), dets.len());
}

#[test]
fn unbounded_eps_collapses_to_one() {
    let dets = scatter(1_000, 5);
    for eps in [1.0e12, f64::INFINITY] {
        let res = deduplicate(&dets, DedupParams::new(eps).unwrap());
        assert_eq!(res.detections.len(), 1);
        assert_eq!(res.clusters[0].members.len(), dets.len());
    }
}

#[test]
fn clusters_partition_the_input_and_keep_the_most_confident() {
    let dets = scatter(1_500, 19);
    let res = deduplicate(&dets, DedupParams::new(10.0).unwrap());

    let mut seen = vec![false; dets.len()];
    for cluster in &res.clusters {
        assert!(cluster.members.contains(&cluster.representative));
        let best = dets[cluster.representative].confidence;
        for &m in &cluster.members {
            assert!(!seen[m], "member {m} appears in two clusters");
            seen[m] = true;
            assert!(dets[m].confidence <= best);
        }
    }
    assert!(seen.into_iter().all(|s| s));
    assert_eq!(res.detections.len(), res.clusters.len());
}
