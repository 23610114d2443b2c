// Mining loop: race an exponential timer against the new-tip signal.
//
// Hash-power competition is modeled, not performed: each round draws a
// delay from Exp(lambda) with lambda = hash_power / inter_arrival_time
// and a block is produced only if no competing tip lands first. The RNG
// is seeded from the CLI so runs are reproducible.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use crate::net::node::PeerNode;

pub struct MinerParams {
    pub lambda: f64,
    pub rng: ChaCha20Rng,
}

impl MinerParams {
    pub fn new(hash_power: f64, inter_arrival_time: u64, random_seed: u64) -> Self {
        MinerParams {
            lambda: hash_power * (1.0 / inter_arrival_time as f64),
            rng: ChaCha20Rng::seed_from_u64(random_seed),
        }
    }
}

/// Inverse-transform draw from Exp(lambda)
fn draw_exponential(rng: &mut ChaCha20Rng, lambda: f64) -> f64 {
    let u: f64 = rng.sample(rand::distributions::Open01);
    -u.ln() / lambda
}

/// The per-peer mining task. Started at most once, on the first
/// observation of START-MINING.
pub async fn run(node: Arc<PeerNode>, mut params: MinerParams) {
    eprintln!("[miner] started, lambda {:.6}", params.lambda);
    loop {
        let delta = draw_exponential(&mut params.rng, params.lambda);
        eprintln!("[miner] timer: {delta:.3}s");

        tokio::select! {
            // a competing tip arrived: restart on it. The signal stores
            // at most one permit, so a burst of tips costs one redraw.
            _ = node.tip_signal.notified() => continue,
            _ = tokio::time::sleep(Duration::from_secs_f64(delta)) => {}
        }

        let nonce: u16 = params.rng.gen_range(0..=u16::MAX);
        for frame in node.produce_block(nonce).await {
            node.broadcast(frame, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_draws_are_reproducible() {
        let mut a = MinerParams::new(0.5, 10, 42);
        let mut b = MinerParams::new(0.5, 10, 42);
        for _ in 0..100 {
            assert_eq!(
                draw_exponential(&mut a.rng, a.lambda).to_bits(),
                draw_exponential(&mut b.rng, b.lambda).to_bits()
            );
        }
    }

    #[test]
    fn test_exponential_mean_tracks_lambda() {
        // lambda = 1.0 * (1/5) => mean 5s
        let mut params = MinerParams::new(1.0, 5, 7);
        let n = 20_000;
        let total: f64 = (0..n)
            .map(|_| draw_exponential(&mut params.rng, params.lambda))
            .sum();
        let mean = total / n as f64;
        assert!((mean - 5.0).abs() < 0.2, "mean {mean} too far from 5.0");
    }

    #[test]
    fn test_draws_are_positive_and_finite() {
        let mut params = MinerParams::new(0.01, 1000, 3);
        for _ in 0..1000 {
            let d = draw_exponential(&mut params.rng, params.lambda);
            assert!(d.is_finite());
            assert!(d > 0.0);
        }
    }
}
