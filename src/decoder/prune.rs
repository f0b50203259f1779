use std::cmp::Ordering;

use ndarray::{s, ArrayView1, ArrayView2};

/// Items below this count are pruned on the calling thread.
const PARALLEL_MIN_ITEMS: usize = 8;

/// The `beam` survivors of one pruning step, in descending score order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Selection {
    pub scores: Vec<f32>,
    pub step_scores: Vec<f32>,
    pub parents: Vec<usize>,
    pub tokens: Vec<i32>,
}

fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// The `k` largest values with their indices, best first. Ties keep the lower
/// index first and NaN ranks as negative infinity.
pub(crate) fn top_k(values: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = values
        .iter()
        .map(|&v| if v.is_nan() { f32::NEG_INFINITY } else { v })
        .enumerate()
        .collect();
    let k = k.min(ranked.len());
    if k == 0 {
        return Vec::new();
    }
    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, rank_order);
        ranked.truncate(k);
    }
    ranked.sort_by(rank_order);
    ranked
}

/// First step: every slot holds the same start hypothesis, so only row 0 counts.
pub(crate) fn prune_first(log_probs: ArrayView1<f32>, beam: usize) -> Selection {
    let top = top_k(log_probs, beam);
    Selection {
        scores: top.iter().map(|&(_, score)| score).collect(),
        step_scores: top.iter().map(|&(_, score)| score).collect(),
        parents: (0..top.len()).collect(),
        tokens: top.iter().map(|&(token, _)| token as i32).collect(),
    }
}

/// Exact top-`beam` over the `beam x beam` candidate matrix built from each
/// slot's own top-`beam` tokens.
pub(crate) fn prune_matrix(
    accumulated: ArrayView1<f32>,
    log_probs: ArrayView2<f32>,
    beam: usize,
) -> Selection {
    let rows = log_probs.nrows();
    let mut candidate_scores = Vec::with_capacity(rows * beam);
    let mut candidate_steps = Vec::with_capacity(rows * beam);
    let mut candidate_tokens = Vec::with_capacity(rows * beam);

    for (slot, row) in log_probs.rows().into_iter().enumerate() {
        let local = top_k(row, beam);
        debug_assert_eq!(local.len(), beam);
        for (token, score) in local {
            candidate_scores.push(accumulated[slot] + score);
            candidate_steps.push(score);
            candidate_tokens.push(token as i32);
        }
    }

    let winners = top_k(ArrayView1::from(&candidate_scores[..]), beam);
    Selection {
        scores: winners.iter().map(|&(_, score)| score).collect(),
        step_scores: winners.iter().map(|&(i, _)| candidate_steps[i]).collect(),
        parents: winners.iter().map(|&(i, _)| i / beam).collect(),
        tokens: winners.iter().map(|&(i, _)| candidate_tokens[i]).collect(),
    }
}

/// Prunes every batch item independently. `accumulated` is `items x beam`,
/// `log_probs` is `(items * beam) x vocab`.
pub(crate) fn prune_items(
    accumulated: ArrayView2<f32>,
    log_probs: ArrayView2<f32>,
    beam: usize,
    first_step: bool,
    threads: usize,
) -> Vec<Selection> {
    let items = accumulated.nrows();
    let prune_one = |item: usize| {
        let rows = log_probs.slice(s![item * beam..(item + 1) * beam, ..]);
        if first_step {
            prune_first(rows.row(0), beam)
        } else {
            prune_matrix(accumulated.row(item), rows, beam)
        }
    };

    if threads <= 1 || items < PARALLEL_MIN_ITEMS {
        return (0..items).map(prune_one).collect();
    }

    let chunk = items.div_ceil(threads);
    let prune_one = &prune_one;
    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..items)
            .step_by(chunk)
            .map(|start| {
                let end = (start + chunk).min(items);
                scope.spawn(move || (start..end).map(prune_one).collect::<Vec<_>>())
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| {
                worker
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}
