//! Parsers for the output of the storage discovery tools.
//!
//! All parsers work line by line and skip whatever they do not recognize, so garbage or
//! truncated output degrades to fewer (or no) records instead of an error.

use anyhow::Result;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::select::Render;

/// A multipath LUN as listed by `multipath -ll`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LunRecord {
    /// WWID of the device, used as LUN id by the deployment tool.
    pub id: String,
    /// Size as printed, including the unit suffix, e.g. `200G`.
    pub size: String,
    pub dm_name: String,
    pub label: String,
    pub active_paths: usize,
}

impl Render for LunRecord {
    fn render(&self) -> String {
        format!(
            "{}  {}  {}  [{}]  paths: {}",
            self.id, self.size, self.dm_name, self.label, self.active_paths
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum LineAction {
    Header,
    Size,
    DmName,
    Label,
    PathBranch,
    Terminal,
}

struct LineRule {
    pattern: Regex,
    action: LineAction,
}

/// Group being assembled from the lines after a header.
struct PendingLun {
    record: LunRecord,
    closed: bool,
}

/// Line-rule driven parser for the `multipath -ll` topology listing.
///
/// Every line is matched against all rules in order, a single line may trigger several of
/// them (the header line also carries the dm name and the label, the last path group line
/// both counts as a path and closes the record).
pub struct LunParser {
    rules: Vec<LineRule>,
}

impl LunParser {
    pub fn new() -> Result<Self> {
        let rule = |pattern: &str, action| -> Result<LineRule> {
            Ok(LineRule {
                pattern: Regex::new(pattern)?,
                action,
            })
        };

        Ok(Self {
            rules: vec![
                rule(
                    r"^(?:(mpath[[:alnum:]]+)(?:\s+\((3[0-9a-fA-F]{32})\))?|(3[0-9a-fA-F]{32}))(?:\s|$)",
                    LineAction::Header,
                )?,
                rule(r"size=(\d+(?:\.\d+)?[MGTPEZY])", LineAction::Size)?,
                rule(r"dm-\S+\s+(\S+)", LineAction::DmName)?,
                rule(r",(\S+)", LineAction::Label)?,
                rule(r"^(?:\|-|`-|├─|└─)", LineAction::PathBranch)?,
                rule(r"^(?:`-|└─)", LineAction::Terminal)?,
            ],
        })
    }

    pub fn parse(&self, text: &str) -> Vec<LunRecord> {
        let mut records = Vec::new();
        let mut pending: Option<PendingLun> = None;

        for (index, line) in text.lines().enumerate() {
            for rule in &self.rules {
                let Some(caps) = rule.pattern.captures(line) else {
                    continue;
                };

                if rule.action == LineAction::Header {
                    if let Some(dropped) = pending.take() {
                        if !dropped.closed {
                            debug!("dropping unterminated LUN group '{}'", dropped.record.id);
                        }
                    }
                    pending = Some(PendingLun {
                        record: LunRecord {
                            id: header_id(&caps),
                            ..Default::default()
                        },
                        closed: false,
                    });
                    continue;
                }

                match pending.as_mut() {
                    None => {
                        if rule.action == LineAction::Terminal {
                            warn!(
                                "multipath output line {}: path group without LUN header, ignoring",
                                index + 1
                            );
                        }
                    }
                    // Anything after the closing line belongs to no LUN until the next header.
                    Some(lun) if lun.closed => {}
                    Some(lun) => apply_rule(lun, rule.action, &caps, &mut records),
                }
            }
        }

        if let Some(dropped) = pending {
            if !dropped.closed {
                debug!("dropping unterminated LUN group '{}'", dropped.record.id);
            }
        }

        records
    }
}

/// The WWID in parentheses of an alias header wins over the alias itself.
fn header_id(caps: &Captures) -> String {
    caps.get(2)
        .or_else(|| caps.get(1))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_owned())
        .unwrap_or_default()
}

fn apply_rule(
    lun: &mut PendingLun,
    action: LineAction,
    caps: &Captures,
    records: &mut Vec<LunRecord>,
) {
    let first = || {
        caps.get(1)
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default()
    };

    match action {
        LineAction::Header => {}
        LineAction::Size => lun.record.size = first(),
        LineAction::DmName => lun.record.dm_name = first(),
        LineAction::Label => lun.record.label = first(),
        LineAction::PathBranch => lun.record.active_paths += 1,
        LineAction::Terminal => {
            lun.closed = true;
            records.push(lun.record.clone());
        }
    }
}

/// Parses a `multipath -ll` listing into LUN records.
pub fn parse_lun_records(text: &str) -> Result<Vec<LunRecord>> {
    Ok(LunParser::new()?.parse(text))
}

/// An NFS export as listed by `showmount -e`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportRecord {
    pub path: String,
    /// Raw client list, informational only.
    pub clients: String,
}

impl Render for ExportRecord {
    fn render(&self) -> String {
        if self.clients.is_empty() {
            self.path.clone()
        } else {
            format!("{}  ({})", self.path, self.clients)
        }
    }
}

/// Parses a `showmount -e` listing, optionally skipping its `Export list for ...` header.
pub fn parse_exports(text: &str, skip_header: bool) -> Vec<ExportRecord> {
    text.lines()
        .skip(usize::from(skip_header))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (path, clients) = line
                .split_once(char::is_whitespace)
                .unwrap_or((line, ""));

            if !path.starts_with('/') {
                debug!("ignoring export line '{line}'");
                return None;
            }

            Some(ExportRecord {
                path: path.to_owned(),
                clients: clients.trim().to_owned(),
            })
        })
        .collect()
}

const TARGET_MARKER: &str = "Target: ";

/// Extracts the target names from iSCSI discovery output, in order and with duplicates.
pub fn parse_targets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(TARGET_MARKER)?;
            let name = rest
                .trim()
                .trim_end_matches("(non-flash)")
                .trim_end_matches("(flash)")
                .trim_end();
            (!name.is_empty()).then(|| name.to_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WWID_A: &str = "36001405a1b2c3d4e5f60718293a4b5c6";
    const WWID_B: &str = "360014051f2e3d4c5b6a79880a1b2c3d4";

    fn parse(text: &str) -> Vec<LunRecord> {
        parse_lun_records(text).unwrap()
    }

    #[test]
    fn single_lun() {
        let text = format!(
            "{WWID_A} dm-2 LIO-ORG,disk01\n\
             size=200G features='0' hwhandler='1 alua' wp=rw\n\
             |-+- policy='service-time 0' prio=50 status=active\n\
             | `- 3:0:0:0 sdb 8:16 active ready running\n\
             `-+- policy='service-time 0' prio=50 status=enabled\n  \
             `- 4:0:0:0 sdc 8:32 active ready running\n"
        );

        assert_eq!(
            parse(&text),
            vec![LunRecord {
                id: WWID_A.to_owned(),
                size: "200G".to_owned(),
                dm_name: "LIO-ORG,disk01".to_owned(),
                label: "disk01".to_owned(),
                active_paths: 2,
            }]
        );
    }

    #[test]
    fn alias_header_uses_wwid() {
        let text = format!(
            "mpatha ({WWID_B}) dm-3 NETAPP,LUN C-Mode\n\
             size=1.5T features='1 queue_if_no_path' hwhandler='0' wp=rw\n\
             `-+- policy='round-robin 0' prio=1 status=active\n"
        );

        let records = parse(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, WWID_B);
        assert_eq!(records[0].size, "1.5T");
        assert_eq!(records[0].dm_name, "NETAPP,LUN");
        assert_eq!(records[0].label, "LUN");
        assert_eq!(records[0].active_paths, 1);
    }

    #[test]
    fn alias_without_wwid() {
        let records = parse("mpathb dm-4 HP,MSA\nsize=10G\n`-+- policy\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "mpathb");
    }

    #[test]
    fn unterminated_group_is_dropped() {
        let text = format!(
            "{WWID_A} dm-2 LIO-ORG,disk01\n\
             size=200G\n\
             |-+- policy='service-time 0' prio=50 status=active\n\
             {WWID_B} dm-3 LIO-ORG,disk02\n\
             size=100G\n\
             `-+- policy='service-time 0' prio=50 status=active\n\
             mpathc dm-5 LIO-ORG,disk03\n\
             size=1T\n"
        );

        let records = parse(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, WWID_B);
        assert_eq!(records[0].size, "100G");
        assert_eq!(records[0].active_paths, 1);
    }

    #[test]
    fn one_record_per_header() {
        // a second closing line must not emit the same LUN again
        let text = format!(
            "{WWID_A} dm-2 LIO-ORG,disk01\n\
             size=200G\n\
             `-+- policy='service-time 0' prio=50 status=active\n\
             `-+- policy='service-time 0' prio=10 status=enabled\n"
        );

        let records = parse(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].active_paths, 1);
    }

    #[test]
    fn closing_line_without_header() {
        assert!(parse("`-+- policy='service-time 0' prio=50 status=active\n").is_empty());
    }

    #[test]
    fn unicode_tree_glyphs() {
        let text = format!("{WWID_A} dm-2 LIO-ORG,disk01\nsize=5G\n├─+- policy\n└─+- policy\n");
        let records = parse(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].active_paths, 2);
    }

    #[test]
    fn short_wwid_is_no_header() {
        assert!(parse("3600140 dm-2 LIO-ORG,disk01\nsize=5G\n`-+- policy\n").is_empty());
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse("").is_empty());
        assert!(parse("multipath: command not found\n\n\0\u{fffd}").is_empty());
    }

    #[test]
    fn exports_skip_header() {
        let text = "Export list for nfs01:\n/path/a client1\n/path/b client2\n";
        assert_eq!(
            parse_exports(text, true),
            vec![
                ExportRecord {
                    path: "/path/a".to_owned(),
                    clients: "client1".to_owned()
                },
                ExportRecord {
                    path: "/path/b".to_owned(),
                    clients: "client2".to_owned()
                },
            ]
        );
        assert!(parse_exports("Export list for nfs01:\n", true).is_empty());
        assert!(parse_exports("", true).is_empty());
    }

    #[test]
    fn exports_keep_raw_clients() {
        let text = "/exports/he    192.168.0.0/24,10.0.0.5 *.rutil.local\n/exports/iso\n";
        let exports = parse_exports(text, false);
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].clients, "192.168.0.0/24,10.0.0.5 *.rutil.local");
        assert_eq!(exports[1].path, "/exports/iso");
        assert_eq!(exports[1].clients, "");
        assert_eq!(exports[1].render(), "/exports/iso");
    }

    #[test]
    fn targets_order_and_duplicates() {
        let text = "Target: iqn.1\n\tPortal: 10.0.0.1:3260,1\nTarget: iqn.2\nTarget: iqn.1\n";
        assert_eq!(parse_targets(text), vec!["iqn.1", "iqn.2", "iqn.1"]);
    }

    #[test]
    fn targets_strip_annotation() {
        let text = "Target: iqn.2003-01.org.linux-iscsi.san:sn.1 (non-flash)\nTarget: \n";
        assert_eq!(
            parse_targets(text),
            vec!["iqn.2003-01.org.linux-iscsi.san:sn.1"]
        );
        assert!(parse_targets("iscsiadm: No portals found\n").is_empty());
    }
}
