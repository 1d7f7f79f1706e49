use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parse a port specification into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats, separated by commas or newlines:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
/// - whitespace and blank entries are ignored
///
/// Order of first appearance is preserved.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Inclusive range of ports. Empty when `start > end`.
pub fn port_range(start: u16, end: u16) -> Vec<u16> {
    (start..=end).collect()
}

/// Named port lists offered to callers that do not pass explicit ports.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanPreset {
    /// Top 20 ports.
    #[default]
    Quick,
    /// Roughly the top 100 ports.
    Common,
    /// Ports 1-1024.
    Full,
}

impl ScanPreset {
    pub fn ports(self) -> Vec<u16> {
        match self {
            ScanPreset::Quick => QUICK_SCAN_PORTS.to_vec(),
            ScanPreset::Common => COMMON_PORTS.to_vec(),
            ScanPreset::Full => port_range(1, 1024),
        }
    }
}

const QUICK_SCAN_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5900,
    8080,
];

const COMMON_PORTS: &[u16] = &[
    20, 21, 22, 23, 25, 26, 37, 53, 67, 68, 69, 79, 80, 81, 82, 88, 100, 110, 111, 113, 119, 123,
    135, 137, 138, 139, 143, 161, 162, 177, 179, 199, 201, 264, 389, 427, 443, 444, 445, 464, 465,
    497, 500, 502, 512, 513, 514, 515, 520, 523, 530, 543, 544, 548, 554, 587, 593, 623, 631, 636,
    639, 666, 771, 789, 873, 902, 993, 995, 1000, 1010, 1024, 1025, 1026, 1027, 1028, 1029, 1030,
    1080, 1099, 1194, 1433, 1434, 1521, 1701, 1720, 1723, 1755, 1883, 1900, 2000, 2049, 2082,
    2083, 2086, 2087, 2095, 2096, 2222, 2323,
];

/// Informative label for a well-known port. Static lookup, nothing is probed.
pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        20 => "FTP Data",
        21 => "FTP Control",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        67 => "DHCP Server",
        68 => "DHCP Client",
        69 => "TFTP",
        80 => "HTTP",
        110 => "POP3",
        119 => "NNTP",
        123 => "NTP",
        135 => "MS RPC",
        137 => "NetBIOS Name",
        138 => "NetBIOS Datagram",
        139 => "NetBIOS Session",
        143 => "IMAP",
        161 => "SNMP",
        162 => "SNMP Trap",
        389 => "LDAP",
        443 => "HTTPS",
        445 => "Microsoft-DS",
        465 => "SMTPS",
        514 => "Syslog",
        587 => "SMTP Submission",
        636 => "LDAPS",
        993 => "IMAPS",
        995 => "POP3S",
        1433 => "MS SQL",
        1434 => "MS SQL Monitor",
        1521 => "Oracle DB",
        1723 => "PPTP",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        5900 => "VNC",
        5901 => "VNC-1",
        6379 => "Redis",
        8080 => "HTTP Proxy",
        8443 => "HTTPS Alt",
        27017 => "MongoDB",
        _ => return None,
    };
    Some(name)
}

/// Like [`service_name`] but falls back to `"Unknown"`.
pub fn service_label(port: u16) -> String {
    service_name(port).unwrap_or("Unknown").to_string()
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let input = "80\n22\n   443  \n";
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, vec![80, 22, 443]);
    }

    #[test]
    fn parse_comma_list_and_ranges() {
        let ports = parse_ports_str("22, 80,8000-8002 ,80").unwrap();
        assert_eq!(ports, vec![22, 80, 8000, 8001, 8002]);
    }

    #[test]
    fn parse_with_comments_and_whitespace() {
        let input = r#"
            # web
            80  # http
            443 # https
            8000-8002   # dev servers
        "#;
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, vec![80, 443, 8000, 8001, 8002]);
    }

    #[test]
    fn reversed_range_errors() {
        assert!(parse_ports_str("90-80").is_err());
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_ports_str("70000\n").is_err());
        assert!(parse_ports_str("http").is_err());
    }

    #[test]
    fn presets_have_expected_sizes() {
        assert_eq!(ScanPreset::Quick.ports().len(), 20);
        assert_eq!(ScanPreset::Common.ports().len(), 99);
        let full = ScanPreset::Full.ports();
        assert_eq!(full.first(), Some(&1));
        assert_eq!(full.last(), Some(&1024));
    }

    #[test]
    fn service_table_lookup() {
        assert_eq!(service_name(22), Some("SSH"));
        assert_eq!(service_name(3389), Some("RDP"));
        assert_eq!(service_name(4), None);
        assert_eq!(service_label(4), "Unknown");
    }

    #[test]
    fn range_helper() {
        assert_eq!(port_range(5, 7), vec![5, 6, 7]);
        assert!(port_range(7, 5).is_empty());
    }
}
