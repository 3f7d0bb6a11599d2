use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Cpu ids partitioned by performance class. On a machine whose cores all run
/// at the same maximum frequency, every core is listed in both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BigLittleCores {
    pub big: Vec<usize>,
    pub little: Vec<usize>,
}

impl BigLittleCores {
    pub fn is_empty(&self) -> bool {
        self.big.is_empty() && self.little.is_empty()
    }
}

/// Reads the cpu topology through the max frequency every core reports in
/// sysfs. Fails if any core's frequency is unreadable.
pub fn query_big_little_core_ids() -> Result<BigLittleCores> {
    scan_big_little_core_ids(Path::new(SYSFS_CPU_ROOT))
}

pub(crate) fn scan_big_little_core_ids(root: &Path) -> Result<BigLittleCores> {
    let freqs = read_max_freqs(root)?;
    let big_freq = freqs.iter().map(|(_, f)| *f).max();
    let little_freq = freqs.iter().map(|(_, f)| *f).min();
    let (big_freq, little_freq) = match (big_freq, little_freq) {
        (Some(b), Some(l)) => (b, l),
        _ => {
            return Err((
                ErrorKind::ConfigError,
                format!("no cpu is found under {}", root.display()),
            )
                .into())
        }
    };

    let mut cores = BigLittleCores::default();
    for (id, freq) in freqs {
        if freq == big_freq {
            cores.big.push(id);
        }
        if freq == little_freq {
            cores.little.push(id);
        }
    }
    Ok(cores)
}

fn read_max_freqs(root: &Path) -> Result<Vec<(usize, u64)>> {
    let entries = fs::read_dir(root).map_err(|err| {
        Error::from((
            ErrorKind::ConfigError,
            format!("failed to list {}", root.display()),
        ))
        .with_cause(err)
    })?;

    let mut ids = vec![];
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name
            .strip_prefix("cpu")
            .and_then(|s| s.parse::<usize>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();

    let mut freqs = Vec::with_capacity(ids.len());
    for id in ids {
        let path = root.join(format!("cpu{}/cpufreq/cpuinfo_max_freq", id));
        let content = fs::read_to_string(&path).map_err(|err| {
            Error::from((
                ErrorKind::ConfigError,
                format!("failed to read the max frequency of cpu {}", id),
            ))
            .with_cause(err)
        })?;
        let freq = content.trim().parse::<u64>().map_err(|err| {
            Error::from((
                ErrorKind::ConfigError,
                format!("invalid max frequency {:?} of cpu {}", content.trim(), id),
            ))
            .with_cause(err)
        })?;
        freqs.push((id, freq));
    }
    Ok(freqs)
}
