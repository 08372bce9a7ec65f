use crate::utils;
use std::collections::BTreeMap;
use std::process::Command;
use thiserror::Error;

const SERVICE_TYPE: &str = "_googlecast._tcp";

/// A cast device as announced over mDNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Friendly name (`fn=`), falling back to the service instance name.
    pub name: String,
    pub id: Option<String>,
    /// Model name (`md=`), e.g. "Google Nest Hub".
    pub model: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("`{0}` is not installed (needed for device discovery)")]
    ToolMissing(&'static str),

    #[error("avahi-browse failed: {0}")]
    BrowseFailed(String),

    #[error("no cast devices found on the network")]
    NoDevices,

    #[error("cast device '{query}' not found. Available: {available}")]
    NotFound { query: String, available: String },

    #[error("cast device name '{query}' is ambiguous. Matches: {candidates}. Use a device id instead.")]
    Ambiguous { query: String, candidates: String },

    #[error("failed to run avahi-browse: {0}")]
    Io(#[from] std::io::Error),
}

pub fn discover_devices() -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
    if !utils::command_exists("avahi-browse") {
        return Err(DiscoveryError::ToolMissing("avahi-browse"));
    }

    let output = Command::new("avahi-browse")
        .args(["-rtp", SERVICE_TYPE])
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let hint = if stderr.to_lowercase().contains("daemon not running") {
            " (start it with `sudo systemctl enable --now avahi-daemon`)"
        } else {
            ""
        };
        return Err(DiscoveryError::BrowseFailed(format!(
            "status {}{}{hint}",
            output.status.code().unwrap_or(-1),
            if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            },
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_avahi_output(&text))
}

/// Parse `avahi-browse -rtp` output into resolved devices.
///
/// Only IPv4 records are kept. Unresolved (`+`) lines are reported without an
/// address unless a resolved (`=`) line for the same device exists.
pub fn parse_avahi_output(text: &str) -> Vec<DiscoveredDevice> {
    let mut resolved: BTreeMap<String, DiscoveredDevice> = BTreeMap::new();
    let mut unresolved: BTreeMap<String, DiscoveredDevice> = BTreeMap::new();

    for line in text.lines() {
        if !line.starts_with('=') && !line.starts_with('+') {
            continue;
        }

        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() < 4 || parts[2] != "IPv4" {
            continue;
        }

        let instance = unescape_avahi(parts[3].trim());
        if instance.is_empty() {
            continue;
        }

        let txt = TxtRecords::from_parts(&parts);
        let name = txt.friendly_name.clone().unwrap_or_else(|| instance.clone());

        if line.starts_with('=') {
            let ip = parts
                .get(7)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let port = parts.get(8).and_then(|v| v.trim().parse::<u16>().ok());
            let key = txt
                .id
                .as_ref()
                .map(|v| format!("id:{v}"))
                .or_else(|| {
                    ip.as_ref()
                        .map(|value| format!("name-ip:{}:{value}", name.to_ascii_lowercase()))
                })
                .unwrap_or_else(|| format!("name:{}", name.to_ascii_lowercase()));

            let entry = resolved.entry(key).or_insert_with(|| DiscoveredDevice {
                name: name.clone(),
                id: txt.id.clone(),
                model: txt.model.clone(),
                ip: ip.clone(),
                port,
            });
            if entry.id.is_none() {
                entry.id = txt.id.clone();
            }
            if entry.model.is_none() {
                entry.model = txt.model.clone();
            }
            if ip.is_some() {
                entry.ip = ip;
                entry.port = port;
            }
            unresolved.remove(&instance.to_ascii_lowercase());
            continue;
        }

        if resolved
            .values()
            .any(|device| device.name.eq_ignore_ascii_case(&name))
        {
            continue;
        }

        unresolved
            .entry(instance.to_ascii_lowercase())
            .or_insert_with(|| DiscoveredDevice {
                name,
                id: txt.id,
                model: txt.model,
                ip: None,
                port: None,
            });
    }

    let mut devices: Vec<DiscoveredDevice> = resolved.into_values().collect();
    devices.extend(unresolved.into_values());
    devices.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.ip.cmp(&b.ip))
    });
    devices
}

/// Pick the device to control. Without a query the first device is used;
/// otherwise match by id, then exact name, then case-insensitive name.
pub fn select_device(
    devices: &[DiscoveredDevice],
    query: Option<&str>,
) -> Result<DiscoveredDevice, DiscoveryError> {
    let query = query.map(str::trim).filter(|q| !q.is_empty());
    let Some(query) = query else {
        return devices.first().cloned().ok_or(DiscoveryError::NoDevices);
    };
    if devices.is_empty() {
        return Err(DiscoveryError::NoDevices);
    }

    let id_matches: Vec<&DiscoveredDevice> = devices
        .iter()
        .filter(|d| d.id.as_deref() == Some(query))
        .collect();
    if let [device] = id_matches.as_slice() {
        return Ok((*device).clone());
    }

    let matchers: [fn(&DiscoveredDevice, &str) -> bool; 2] = [
        |d, q| d.name == q,
        |d, q| d.name.eq_ignore_ascii_case(q),
    ];
    for matches in matchers {
        let found: Vec<&DiscoveredDevice> = devices.iter().filter(|d| matches(d, query)).collect();
        match found.as_slice() {
            [] => continue,
            [device] => return Ok((*device).clone()),
            many => {
                return Err(DiscoveryError::Ambiguous {
                    query: query.to_string(),
                    candidates: format_candidates(many),
                })
            }
        }
    }

    Err(DiscoveryError::NotFound {
        query: query.to_string(),
        available: available_device_list(devices),
    })
}

pub fn describe(device: &DiscoveredDevice) -> String {
    let location = match (&device.ip, device.port) {
        (Some(ip), Some(port)) => format!("{ip}:{port}"),
        (Some(ip), None) => ip.clone(),
        _ => "unresolved".to_string(),
    };
    let model = device
        .model
        .as_deref()
        .map(|m| format!(" - {m}"))
        .unwrap_or_default();
    let id = device
        .id
        .as_ref()
        .map(|id| format!(" [id={id}]"))
        .unwrap_or_default();
    format!("{}{model}{id} ({location})", device.name)
}

fn format_candidates(devices: &[&DiscoveredDevice]) -> String {
    devices
        .iter()
        .map(|d| describe(d))
        .collect::<Vec<_>>()
        .join(", ")
}

fn available_device_list(devices: &[DiscoveredDevice]) -> String {
    if devices.is_empty() {
        return "none".to_string();
    }
    devices
        .iter()
        .map(|d| match &d.id {
            Some(id) => format!("{} [id={id}]", d.name),
            None => d.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Default)]
struct TxtRecords {
    id: Option<String>,
    friendly_name: Option<String>,
    model: Option<String>,
}

impl TxtRecords {
    fn from_parts(parts: &[&str]) -> Self {
        let mut records = Self::default();
        for part in parts.iter().skip(4) {
            for record in split_txt_records(part) {
                let Some((key, value)) = record.split_once('=') else {
                    continue;
                };
                let value = unescape_avahi(value.trim());
                if value.is_empty() {
                    continue;
                }
                let slot = match key.trim().to_ascii_lowercase().as_str() {
                    "id" => &mut records.id,
                    "fn" => &mut records.friendly_name,
                    "md" => &mut records.model,
                    _ => continue,
                };
                slot.get_or_insert(value);
            }
        }
        records
    }
}

fn split_txt_records(txt: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut in_quote = false;
    let mut current = String::new();

    for ch in txt.chars() {
        match ch {
            '"' if in_quote => {
                in_quote = false;
                if !current.is_empty() {
                    records.push(current.clone());
                }
                current.clear();
            }
            '"' => {
                in_quote = true;
                current.clear();
            }
            _ if in_quote => current.push(ch),
            _ => {}
        }
    }

    if records.is_empty() {
        for token in txt.split_whitespace() {
            let cleaned = token.trim_matches('"').to_string();
            if !cleaned.is_empty() {
                records.push(cleaned);
            }
        }
    }

    records
}

/// Decode avahi's `\DDD` decimal byte escapes.
fn unescape_avahi(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(u8::is_ascii_digit)
        {
            let code = (bytes[i + 1] - b'0') as u32 * 100
                + (bytes[i + 2] - b'0') as u32 * 10
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
