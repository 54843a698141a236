//! Latency and transient bus fault simulation

use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{FaultInjectionConfig, LatencyConfig};
use crate::error::CommErrorKind;

/// Random source for latency draws, fault rolls and drift
pub struct FaultInjector {
    rng: Mutex<StdRng>,
    latency: RwLock<LatencyConfig>,
    faults: RwLock<FaultInjectionConfig>,
}

impl FaultInjector {
    /// Seeded injectors replay the same sequence of draws
    pub fn new(latency: LatencyConfig, faults: FaultInjectionConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            latency: RwLock::new(latency),
            faults: RwLock::new(faults),
        }
    }

    pub fn fault_injection(&self) -> FaultInjectionConfig {
        *self.faults.read()
    }

    pub fn set_fault_injection(&self, config: FaultInjectionConfig) {
        *self.faults.write() = config;
    }

    pub fn set_latency(&self, config: LatencyConfig) {
        *self.latency.write() = config;
    }

    /// Uniform draw from the latency window
    pub fn latency(&self) -> Duration {
        let LatencyConfig { min_ms, max_ms } = *self.latency.read();
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = if min_ms >= max_ms {
            max_ms
        } else {
            self.rng.lock().gen_range(min_ms..=max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Roll for a transient bus fault
    pub fn roll(&self) -> Option<CommErrorKind> {
        let FaultInjectionConfig {
            enabled,
            probability,
        } = *self.faults.read();
        if !enabled || probability <= 0.0 {
            return None;
        }

        let mut rng = self.rng.lock();
        if !rng.gen_bool(probability.min(1.0)) {
            return None;
        }
        let index = rng.gen_range(0..CommErrorKind::BUS_FAULTS.len());
        Some(CommErrorKind::BUS_FAULTS[index])
    }

    /// Borrow the generator for other simulated randomness
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.rng.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_faults() {
        let injector = FaultInjector::new(
            LatencyConfig::none(),
            FaultInjectionConfig {
                enabled: false,
                probability: 1.0,
            },
            Some(1),
        );
        assert!((0..100).all(|_| injector.roll().is_none()));
    }

    #[test]
    fn test_certain_fault_is_bus_kind() {
        let injector = FaultInjector::new(
            LatencyConfig::none(),
            FaultInjectionConfig {
                enabled: true,
                probability: 1.0,
            },
            Some(7),
        );
        for _ in 0..50 {
            let kind = injector.roll();
            assert!(kind.is_some_and(|k| k.is_bus_fault()));
        }
    }

    #[test]
    fn test_latency_window() {
        let injector = FaultInjector::new(
            LatencyConfig { min_ms: 2, max_ms: 4 },
            FaultInjectionConfig::default(),
            Some(3),
        );
        for _ in 0..50 {
            let d = injector.latency();
            assert!(d >= Duration::from_millis(2) && d <= Duration::from_millis(4));
        }

        injector.set_latency(LatencyConfig::none());
        assert_eq!(injector.latency(), Duration::ZERO);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let faults = FaultInjectionConfig {
            enabled: true,
            probability: 0.5,
        };
        let a = FaultInjector::new(LatencyConfig::default(), faults, Some(42));
        let b = FaultInjector::new(LatencyConfig::default(), faults, Some(42));
        let draws_a: Vec<_> = (0..20).map(|_| (a.latency(), a.roll())).collect();
        let draws_b: Vec<_> = (0..20).map(|_| (b.latency(), b.roll())).collect();
        assert_eq!(draws_a, draws_b);
    }
}
