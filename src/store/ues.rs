//! UE store: attached User Equipments, keyed by IMSI.
//!
//! IMSI allocation is the one place this store does more than plain CRUD:
//! §3 draws a fresh IMSI uniformly from `[1_000_000, 9_999_999]` and must
//! detect a collision against the live population. The distilled spec
//! retries once and gives up silently; §9 flags that as unsafe under heavy
//! population, so `create_with_random_imsi` loops a bounded number of
//! times and returns `Error::Invalid` on exhaustion instead.

use super::EntityStore;
use super::watch::WatchReceiver;
use crate::error::{Error, Result};
use crate::model::{Ecgi, Imsi, Ue, IMSI_RANGE_END, IMSI_RANGE_START};
use rand::Rng;

pub struct UeStore {
    inner: EntityStore<Imsi, Ue>,
}

impl UeStore {
    pub fn new() -> Self {
        UeStore { inner: EntityStore::new("ue") }
    }

    pub fn get(&self, imsi: &Imsi) -> Result<Ue> {
        self.inner.get(imsi)
    }

    /// Insert unconditionally, overwriting any existing UE at this IMSI.
    pub fn put(&self, ue: Ue) {
        self.inner.put(ue.imsi, ue)
    }

    pub fn update(&self, imsi: &Imsi, mutate: impl FnOnce(&mut Ue)) -> Result<Ue> {
        self.inner.update(imsi, mutate)
    }

    pub fn delete(&self, imsi: &Imsi) -> Result<Ue> {
        self.inner.delete(imsi)
    }

    pub fn list(&self) -> Vec<Ue> {
        self.inner.list()
    }

    pub fn list_by_serving_cell(&self, ecgi: &Ecgi) -> Vec<Ue> {
        self.inner.list_filtered(|ue| ue.serving.ecgi == *ecgi)
    }

    pub fn watch(&self) -> WatchReceiver<Imsi, Ue> {
        self.inner.watch()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw a fresh IMSI, retrying on collision up to `max_attempts`
    /// times, and insert the UE `build` constructs for it.
    pub fn create_with_random_imsi(&self, rng: &mut impl Rng, max_attempts: u32, build: impl Fn(Imsi) -> Ue) -> Result<Imsi> {
        for _ in 0..max_attempts.max(1) {
            let imsi = Imsi(rng.gen_range(IMSI_RANGE_START..=IMSI_RANGE_END));
            if self.inner.get(&imsi).is_ok() {
                continue;
            }
            let ue = build(imsi);
            // A racing creator could have just taken this IMSI; `create`
            // catching `AlreadyExists` and retrying keeps this atomic.
            match self.inner.create(imsi, ue) {
                Ok(()) => return Ok(imsi),
                Err(Error::AlreadyExists(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(Error::Invalid(format!("exhausted {max_attempts} IMSI allocation attempts")))
    }

    /// Grow or shrink the population to exactly `n` UEs. Idempotent:
    /// calling it twice in a row with the same `n` is a no-op the second
    /// time (§8).
    pub fn set_count(&self, n: usize, rng: &mut impl Rng, max_attempts: u32, build: impl Fn(Imsi) -> Ue) -> Result<()> {
        loop {
            let current = self.len();
            if current == n {
                return Ok(());
            }
            if current < n {
                self.create_with_random_imsi(rng, max_attempts, &build)?;
            } else {
                let victim = self.inner.list().first().map(|ue| ue.imsi);
                match victim {
                    Some(imsi) => {
                        self.delete(&imsi)?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

impl Default for UeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeoPoint, RrcState, ServingCell};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dummy_ue(imsi: Imsi) -> Ue {
        Ue {
            imsi,
            ue_type: "phone".into(),
            position: GeoPoint { lat: 0.0, lng: 0.0 },
            heading_deg: 0.0,
            crnti: 1,
            serving: ServingCell {
                ecgi: Ecgi { plmn: crate::model::PlmnId::new(1), enb_id: crate::model::NodeId(1), cell_index: 1 },
                strength_db: -80.0,
            },
            neighbors: Vec::new(),
            rrc_state: RrcState::Idle,
            admitted: true,
            handover_dwell: 0,
        }
    }

    #[test]
    fn set_ue_count_is_idempotent() {
        let store = UeStore::new();
        let mut rng = StdRng::seed_from_u64(42);
        store.set_count(5, &mut rng, 5, dummy_ue).unwrap();
        assert_eq!(store.len(), 5);
        store.set_count(5, &mut rng, 5, dummy_ue).unwrap();
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn set_ue_count_shrinks_population() {
        let store = UeStore::new();
        let mut rng = StdRng::seed_from_u64(7);
        store.set_count(8, &mut rng, 5, dummy_ue).unwrap();
        store.set_count(3, &mut rng, 5, dummy_ue).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn delete_of_absent_imsi_is_not_found() {
        let store = UeStore::new();
        assert!(matches!(store.delete(&Imsi(1_234_567)), Err(Error::NotFound(_))));
    }
}
