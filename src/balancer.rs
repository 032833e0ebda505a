use super::*;

/// One worker's contribution to the balancing round.
#[derive(Debug, Clone)]
pub struct WorkerSample {
    pub worker: WorkerIdentifier,
    pub hash_rate: f64,
    pub pool: usize,
}

/// A planned move of one worker between pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub worker: WorkerIdentifier,
    pub from: usize,
    pub to: usize,
}

/// Plans a redistribution of workers over pools.
///
/// Every pool's target is its weight share of the total sampled rate. From
/// fastest to slowest, workers first keep their current pool while its
/// target has room for them; the overflow is then placed worst-fit, each
/// spilled worker onto the pool with the most unfilled target. This keeps
/// per-pool totals proportional to the weights without churning workers
/// that are already where they belong. With no measurable rate yet, every
/// worker counts as one unit so the split degrades to weighted head counts.
pub fn plan_rebalance(weights: &[f64], workers: &[WorkerSample]) -> Vec<Assignment> {
    if weights.is_empty() || workers.is_empty() {
        return Vec::new();
    }

    let measured: f64 = workers.iter().map(|w| w.hash_rate).sum();
    let rate_of =
        |worker: &WorkerSample| if measured > 0.0 { worker.hash_rate } else { 1.0 };
    let total: f64 = workers.iter().map(rate_of).sum();

    let mut remaining: Vec<f64> = weights.iter().map(|weight| total * weight).collect();

    let mut ordered: Vec<&WorkerSample> = workers.iter().collect();
    ordered.sort_by(|a, b| {
        rate_of(b)
            .partial_cmp(&rate_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut spilled = Vec::new();
    for worker in ordered {
        let rate = rate_of(worker);
        if worker.pool < remaining.len() && remaining[worker.pool] >= rate {
            remaining[worker.pool] -= rate;
        } else {
            spilled.push(worker);
        }
    }

    let mut assignments = Vec::new();
    for worker in spilled {
        let mut to = 0;
        for (pool, &room) in remaining.iter().enumerate() {
            if room > remaining[to] {
                to = pool;
            }
        }

        remaining[to] -= rate_of(worker);
        if to != worker.pool {
            assignments.push(Assignment {
                worker: worker.worker,
                from: worker.pool,
                to,
            });
        }
    }

    assignments
}
