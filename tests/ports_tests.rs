use netwatch::ports::{load_ports_from_path, parse_ports_str, ScanPreset};

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # common ports
        22
        80  # http
        443 # https
        8000-8002
        8001  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, preserve insertion order of first appearance in each range/line
    assert_eq!(ports, vec![22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn invalid_port_rejected() {
    let input = "0\n"; // invalid: out of range
    assert!(parse_ports_str(input).is_err());
}

#[test]
fn comma_separated_list() {
    let ports = parse_ports_str("22, 80,8000-8002,80").expect("parse ok");
    assert_eq!(ports, vec![22, 80, 8000, 8001, 8002]);
}

#[test]
fn reversed_range_rejected() {
    assert!(parse_ports_str("90-80").is_err());
}

#[test]
fn ports_file_is_read() {
    use std::io::Write;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "# web\n80\n443\n8080-8081").unwrap();
    let ports = load_ports_from_path(f.path()).expect("load ok");
    assert_eq!(ports, vec![80, 443, 8080, 8081]);
}

#[test]
fn presets_have_expected_sizes() {
    assert_eq!(ScanPreset::Quick.ports().len(), 20);
    assert_eq!(ScanPreset::Full.ports(), (1..=1024).collect::<Vec<u16>>());
    assert_eq!(ScanPreset::default(), ScanPreset::Quick);
}
