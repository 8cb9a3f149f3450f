use super::key::{DarkFrameKey, SampleIndex};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Files present for one calibration key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    pub samples: BTreeSet<u32>,
    pub master: bool,
}

type GainLevel = BTreeMap<u32, KeyState>;
type ExposureLevel = BTreeMap<u32, GainLevel>;

/// In-memory view of the dark library: temperature -> exposure -> gain.
///
/// Built once by scanning the library root and kept in step with every write
/// the builder makes, so lookups never touch the directory tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DarkIndex {
    buckets: BTreeMap<i32, ExposureLevel>,
}

impl DarkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `{root}/{temperature}/{exposure}/{gain}/` and record every dark file.
    ///
    /// Entries whose names are not numbers are ignored. A missing root is an empty library.
    pub async fn scan(root: &Path) -> Result<Self> {
        let mut index = Self::new();
        if !fs::try_exists(root).await? {
            debug!("Dark library {} does not exist yet", root.display());
            return Ok(index);
        }

        for (temperature_dc, temp_dir) in numeric_subdirs::<i32>(root).await? {
            for (exposure_secs, exp_dir) in numeric_subdirs::<u32>(&temp_dir).await? {
                for (gain, gain_dir) in numeric_subdirs::<u32>(&exp_dir).await? {
                    let key = DarkFrameKey::new(temperature_dc, exposure_secs, gain);
                    let state = index.entry(key);

                    let mut files = fs::read_dir(&gain_dir).await?;
                    while let Some(entry) = files.next_entry().await? {
                        let name = entry.file_name();
                        let Some(name) = name.to_str() else { continue };
                        match DarkFrameKey::parse_file_name(name) {
                            Some((file_key, slot)) if file_key == key => match slot {
                                SampleIndex::Master => state.master = true,
                                SampleIndex::Raw(i) => {
                                    state.samples.insert(i);
                                }
                            },
                            Some(_) => warn!(
                                "Dark {} does not belong in {}",
                                name,
                                gain_dir.display()
                            ),
                            None => {}
                        }
                    }
                }
            }
        }

        debug!(
            "Indexed {} dark keys ({} masters) under {}",
            index.len(),
            index.master_count(),
            root.display()
        );
        Ok(index)
    }

    fn entry(&mut self, key: DarkFrameKey) -> &mut KeyState {
        self.buckets
            .entry(key.temperature_dc)
            .or_default()
            .entry(key.exposure_secs)
            .or_default()
            .entry(key.gain)
            .or_default()
    }

    pub fn get(&self, key: &DarkFrameKey) -> Option<&KeyState> {
        self.buckets
            .get(&key.temperature_dc)?
            .get(&key.exposure_secs)?
            .get(&key.gain)
    }

    pub fn has_master(&self, key: &DarkFrameKey) -> bool {
        self.get(key).map(|s| s.master).unwrap_or(false)
    }

    pub fn has_sample(&self, key: &DarkFrameKey, index: u32) -> bool {
        self.get(key)
            .map(|s| s.samples.contains(&index))
            .unwrap_or(false)
    }

    pub fn insert_sample(&mut self, key: DarkFrameKey, index: u32) {
        self.entry(key).samples.insert(index);
    }

    pub fn remove_sample(&mut self, key: &DarkFrameKey, index: u32) {
        if let Some(state) = self.get_mut(key) {
            state.samples.remove(&index);
        }
    }

    pub fn mark_master(&mut self, key: DarkFrameKey) {
        self.entry(key).master = true;
    }

    pub fn clear_samples(&mut self, key: &DarkFrameKey) {
        if let Some(state) = self.get_mut(key) {
            state.samples.clear();
        }
    }

    fn get_mut(&mut self, key: &DarkFrameKey) -> Option<&mut KeyState> {
        self.buckets
            .get_mut(&key.temperature_dc)
            .and_then(|e| e.get_mut(&key.exposure_secs))
            .and_then(|g| g.get_mut(&key.gain))
    }

    /// Drop keys holding no files, then levels left empty.
    pub fn prune(&mut self) {
        for exposures in self.buckets.values_mut() {
            for gains in exposures.values_mut() {
                gains.retain(|_, state| state.master || !state.samples.is_empty());
            }
            exposures.retain(|_, gains| !gains.is_empty());
        }
        self.buckets.retain(|_, exposures| !exposures.is_empty());
    }

    /// All keys in ascending (temperature, exposure, gain) order.
    pub fn iter(&self) -> impl Iterator<Item = (DarkFrameKey, &KeyState)> + '_ {
        self.buckets.iter().flat_map(|(&t, exposures)| {
            exposures.iter().flat_map(move |(&e, gains)| {
                gains
                    .iter()
                    .map(move |(&g, state)| (DarkFrameKey::new(t, e, g), state))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn master_count(&self) -> usize {
        self.iter().filter(|(_, s)| s.master).count()
    }

    /// Greedy nearest key: temperature first, then exposure within that
    /// temperature, then gain within that exposure.
    ///
    /// Each level keeps the first candidate with the smallest absolute
    /// difference in ascending order, so ties go to the lower value. The
    /// chosen key is returned only if it holds a master; there is no fallback
    /// to another branch.
    pub fn find_closest(&self, temperature_dc: i32, exposure_secs: u32, gain: u32) -> Option<DarkFrameKey> {
        let (&t, exposures) = closest(&self.buckets, |&t| (t as i64 - temperature_dc as i64).abs())?;
        let (&e, gains) = closest(exposures, |&e| (e as i64 - exposure_secs as i64).abs())?;
        let (&g, state) = closest(gains, |&g| (g as i64 - gain as i64).abs())?;

        let key = DarkFrameKey::new(t, e, g);
        if state.master {
            Some(key)
        } else {
            debug!("Closest dark key {} has no master", key);
            None
        }
    }
}

fn closest<K, V, F>(level: &BTreeMap<K, V>, distance: F) -> Option<(&K, &V)>
where
    F: Fn(&K) -> i64,
{
    let mut best: Option<(i64, (&K, &V))> = None;
    for (k, v) in level {
        let d = distance(k);
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, (k, v)));
        }
    }
    best.map(|(_, kv)| kv)
}

async fn numeric_subdirs<T: std::str::FromStr>(dir: &Path) -> Result<Vec<(T, std::path::PathBuf)>> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(value) = entry.file_name().to_str().and_then(|n| n.parse::<T>().ok()) {
            found.push((value, entry.path()));
        }
    }
    Ok(found)
}
