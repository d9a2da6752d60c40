//! Parsing of `machinectl list` / `machinectl list-images` output.
//!
//! The output is whitespace-delimited with a header line, a blank line and a
//! "N machines listed." footer. Column 0 is the name; for machines column 5
//! is the first IP address (present only on newer machinectl and only once the
//! machine has one). Long values are truncated with a trailing `...`.

use super::{ImageRecord, MachineRecord};

pub fn parse_machines(output: &str) -> Vec<MachineRecord> {
    data_rows(output)
        .map(|cols| MachineRecord {
            name: trim_ellipsis(cols[0]),
            class: cols.get(1).map(|s| s.to_string()).unwrap_or_default(),
            service: cols.get(2).map(|s| s.to_string()).unwrap_or_default(),
            address: cols
                .get(5)
                .map(|s| trim_ellipsis(s))
                .filter(|s| !s.is_empty() && *s != "-"),
        })
        .collect()
}

pub fn parse_images(output: &str) -> Vec<ImageRecord> {
    data_rows(output)
        .map(|cols| ImageRecord {
            name: trim_ellipsis(cols[0]),
            kind: cols.get(1).map(|s| s.to_string()).unwrap_or_default(),
            read_only: cols.get(2).is_some_and(|ro| *ro == "yes"),
        })
        .collect()
}

fn data_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|cols| !cols.is_empty())
        .filter(|cols| !is_header(cols) && !is_footer(cols))
}

fn is_header(cols: &[&str]) -> bool {
    cols[0] == "MACHINE" || cols[0] == "NAME"
}

fn is_footer(cols: &[&str]) -> bool {
    let counted = cols.len() >= 2
        && cols[0].chars().all(|c| c.is_ascii_digit())
        && (cols[1].starts_with("machine") || cols[1].starts_with("image"));
    counted || cols[0] == "No"
}

fn trim_ellipsis(value: &str) -> String {
    value.trim_end_matches("...").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
MACHINE                  CLASS     SERVICE        OS      VERSION ADDRESSES
demo-master-a1b2c3       container systemd-nspawn flatcar 2303.3.0 10.22.0.2...
demo-worker-d4e5f6       container systemd-nspawn flatcar 2303.3.0 10.22.0.3
demo-worker-g7h8i9       container systemd-nspawn flatcar 2303.3.0 -

3 machines listed.
";

    const LIST_OLD: &str = "\
MACHINE                 CLASS     SERVICE
demo-master-a1b2c3      container systemd-nspawn

1 machines listed.
";

    const IMAGES: &str = "\
NAME               TYPE      RO  USAGE  CREATED                     MODIFIED
flatcar            raw       no  1.1G   Mon 2026-10-19 10:00:00 UTC n/a
demo-master-a1b2c3 raw       no  1.1G   Mon 2026-10-19 10:05:00 UTC n/a

2 images listed.
";

    #[test]
    fn test_parse_machines_with_addresses() {
        let machines = parse_machines(LIST);
        assert_eq!(machines.len(), 3);
        assert_eq!(machines[0].name, "demo-master-a1b2c3");
        assert_eq!(machines[0].class, "container");
        assert_eq!(machines[0].address.as_deref(), Some("10.22.0.2"));
        assert_eq!(machines[1].address.as_deref(), Some("10.22.0.3"));
        assert_eq!(machines[2].address, None);
    }

    #[test]
    fn test_parse_machines_without_address_column() {
        let machines = parse_machines(LIST_OLD);
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].service, "systemd-nspawn");
        assert_eq!(machines[0].address, None);
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_machines("No machines.\n").is_empty());
        assert!(parse_machines("").is_empty());
    }

    #[test]
    fn test_parse_images() {
        let images = parse_images(IMAGES);
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["flatcar", "demo-master-a1b2c3"]);
        assert_eq!(images[0].kind, "raw");
        assert!(!images[0].read_only);
    }
}
