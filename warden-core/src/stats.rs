//! Host statistics
//!
//! One composite command prints `cpu%, clockGHz, memUsed/memTotal, diskUsed/diskTotal, kind`
//! (spread over several lines). Parsing strips every whitespace character, then
//! expects exactly five comma separated fields. Nothing falls back to a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, WardenError};
use crate::execution::ChannelFactory;
use crate::models::{Host, HostStatus};
use crate::services::close_quietly;

pub const HOST_STATS_COMMAND: &str = r#"echo -e "$(top -bn1 | grep 'Cpu(s)' | awk '{print 100 - $8}'),
$(if ls /sys/devices/system/cpu/cpu*/cpufreq/scaling_cur_freq &>/dev/null; then
    freq=$(awk '{s+=$1} END {print s/NR/1000000}' /sys/devices/system/cpu/cpu*/cpufreq/scaling_cur_freq);
    printf "%.2f" $freq;
  else
    freq=$(lscpu | grep 'CPU MHz' | awk '{print $3/1000}');
    printf "%.2f" $freq;
  fi),
$(free -b | awk '/Mem:/ {printf "%.2f/%.2f\n", $3/1073741824, $2/1073741824}'),
$(df --block-size=1G --total | awk '/total/ {printf "%d/%d\n", $3, $2}'),
$(if lsblk -d -o NAME | grep -q mmcblk; then echo "SD_CARD";
  elif lsblk -d -o NAME | grep -q nvme; then echo "SSD_NVMe";
  elif lsblk -d -o NAME | grep -q vda; then echo "VIRTUAL_DISK";
  elif lsblk -d -o ROTA | awk 'NR>1' | grep -q 0; then echo "SSD";
  else echo "HARD_DISK"; fi)"
"#;

/// `usage / total` with its derived percentage
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HostStat {
    pub usage: f64,
    pub total: f64,
    pub percent: f64,
}

impl HostStat {
    pub fn new(usage: f64, total: f64) -> Self {
        Self {
            usage,
            total,
            percent: percent_of(usage, total),
        }
    }

    /// Parses a `used/total` pair, unit suffixes such as `G` or `GiB` are ignored
    pub fn parse(field: &'static str, raw: &str) -> Result<Self> {
        let malformed = || WardenError::StatsParse {
            field,
            value: raw.to_string(),
        };
        let (usage, total) = raw.split_once('/').ok_or_else(malformed)?;
        let usage = parse_quantity(usage).ok_or_else(malformed)?;
        let total = parse_quantity(total).ok_or_else(malformed)?;
        Ok(Self::new(usage, total))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(flatten)]
    pub stat: HostStat,
    /// GHz
    pub clock: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    #[serde(rename = "SD_CARD")]
    SdCard,
    #[serde(rename = "SSD_NVMe")]
    SsdNvme,
    #[serde(rename = "VIRTUAL_DISK")]
    VirtualDisk,
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HARD_DISK")]
    HardDisk,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::SdCard => "SD_CARD",
            StorageKind::SsdNvme => "SSD_NVMe",
            StorageKind::VirtualDisk => "VIRTUAL_DISK",
            StorageKind::Ssd => "SSD",
            StorageKind::HardDisk => "HARD_DISK",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SD_CARD" => Ok(StorageKind::SdCard),
            "SSD_NVMe" => Ok(StorageKind::SsdNvme),
            "VIRTUAL_DISK" => Ok(StorageKind::VirtualDisk),
            "SSD" => Ok(StorageKind::Ssd),
            "HARD_DISK" => Ok(StorageKind::HardDisk),
            other => Err(WardenError::StatsParse {
                field: "storage kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    #[serde(flatten)]
    pub stat: HostStat,
    pub kind: StorageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostStats {
    pub cpu: CpuUsage,
    pub memory: HostStat,
    pub storage: StorageUsage,
}

/// What operators look at: the host and its stats when they could be fetched
#[derive(Debug, Clone, Serialize)]
pub struct HostOverview {
    pub host_id: String,
    pub name: String,
    pub status: HostStatus,
    pub stats: Option<HostStats>,
}

/// `round(usage / total * 100, 2)`, 0 for an empty total
pub fn percent_of(usage: f64, total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    (usage / total * 100.0 * 100.0).round() / 100.0
}

fn parse_quantity(raw: &str) -> Option<f64> {
    let digits = raw.trim_end_matches(|c: char| matches!(c, 'K' | 'M' | 'G' | 'T' | 'i' | 'B'));
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| WardenError::StatsParse {
            field,
            value: raw.to_string(),
        })
}

pub fn parse_host_stats(raw: &str) -> Result<HostStats> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let fields: Vec<&str> = compact.split(',').collect();
    if fields.len() != 5 {
        return Err(WardenError::StatsParse {
            field: "record",
            value: compact,
        });
    }

    let cpu = CpuUsage {
        stat: HostStat::new(parse_number("cpu usage", fields[0])?, 100.0),
        clock: parse_number("cpu clock", fields[1])?,
    };
    let memory = HostStat::parse("memory", fields[2])?;
    let storage = StorageUsage {
        stat: HostStat::parse("storage", fields[3])?,
        kind: fields[4].parse()?,
    };

    Ok(HostStats { cpu, memory, storage })
}

pub struct HostStatsCollector {
    factory: Arc<dyn ChannelFactory>,
}

impl HostStatsCollector {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self { factory }
    }

    pub async fn collect(&self, host: &Host) -> Result<HostStats> {
        let mut channel = self.factory.open(host).await?;
        let raw = channel.execute(HOST_STATS_COMMAND).await;
        close_quietly(channel.as_mut()).await;
        let stats = parse_host_stats(&raw?)?;
        debug!("stats for {}: {:?}", host.name, stats);
        Ok(stats)
    }

    /// Like [`collect`](Self::collect) but an unreachable host yields empty stats
    pub async fn overview(&self, host: &Host) -> Result<HostOverview> {
        let stats = match self.collect(host).await {
            Ok(stats) => Some(stats),
            Err(e) if e.is_connection() => {
                warn!("{} unreachable, overview without stats: {}", host.name, e);
                None
            }
            Err(e) => return Err(e),
        };
        Ok(HostOverview {
            host_id: host.id.clone(),
            name: host.name.clone(),
            status: host.status,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_record() {
        let stats = parse_host_stats("45.2,2.40,3.1G/8.0G,20G/100G,SSD").unwrap();
        assert_eq!(stats.cpu.stat.usage, 45.2);
        assert_eq!(stats.cpu.stat.total, 100.0);
        assert_eq!(stats.cpu.clock, 2.40);
        assert_eq!(stats.memory.percent, 38.75);
        assert_eq!(stats.storage.stat.percent, 20.0);
        assert_eq!(stats.storage.kind, StorageKind::Ssd);
    }

    #[test]
    fn test_whitespace_and_newlines_are_ignored() {
        let raw = "12.5,\n  1.80,\n 3.42/15.51\n,\n 120/468\n,\n SSD_NVMe\n";
        let stats = parse_host_stats(raw).unwrap();
        assert_eq!(stats.cpu.stat.percent, 12.5);
        assert_eq!(stats.memory.usage, 3.42);
        assert_eq!(stats.storage.stat.total, 468.0);
        assert_eq!(stats.storage.kind, StorageKind::SsdNvme);
    }

    #[test]
    fn test_zero_total_does_not_divide() {
        assert_eq!(HostStat::new(5.0, 0.0).percent, 0.0);
        assert_eq!(percent_of(1.0, 3.0), 33.33);
    }

    #[test]
    fn test_malformed_fields_are_errors() {
        assert!(matches!(
            parse_host_stats("abc,2.40,3.1/8.0,20/100,SSD"),
            Err(WardenError::StatsParse { field: "cpu usage", .. })
        ));
        assert!(matches!(
            parse_host_stats("45.2,2.40,3.1,20/100,SSD"),
            Err(WardenError::StatsParse { field: "memory", .. })
        ));
        assert!(matches!(
            parse_host_stats("45.2,2.40,3.1/8.0,20/100,FLOPPY"),
            Err(WardenError::StatsParse { field: "storage kind", .. })
        ));
        assert!(matches!(
            parse_host_stats("45.2,2.40,3.1/8.0"),
            Err(WardenError::StatsParse { field: "record", .. })
        ));
    }

    #[test]
    fn test_storage_kind_wire_names() {
        for kind in [
            StorageKind::SdCard,
            StorageKind::SsdNvme,
            StorageKind::VirtualDisk,
            StorageKind::Ssd,
            StorageKind::HardDisk,
        ] {
            assert_eq!(kind.as_str().parse::<StorageKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind));
        }
    }
}
