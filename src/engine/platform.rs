//! `show platform` 解析

use once_cell::sync::Lazy;
use regex::Regex;

pub const PLATFORM_QUERY: &str = "show platform";

/// 设备完全启动的标志状态
pub const FULLY_BOOTED_STATE: &str = "IOS XR RUN";

/// 计算节点可接受的状态
pub const VALID_MODULE_STATES: &[&str] = &[
    "IOS XR RUN",
    "PRESENT",
    "READY",
    "OK",
    "DISABLED",
    "UNPOWERED",
    "POWERED_OFF",
    "SW_INACTIVE",
    "ADMIN DOWN",
    "OPERATIONAL",
    "NOT ALLOW ONLIN",
];

static ROW: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(\d+/\S+)\s+(.*)$").ok());
static COLUMN_GAP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s{2,}").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRow {
    pub node: String,
    pub module_type: String,
    pub state: String,
    pub config_state: String,
}

impl ModuleRow {
    pub fn is_compute(&self) -> bool {
        self.node.contains("CPU")
    }

    pub fn is_valid(&self) -> bool {
        VALID_MODULE_STATES.contains(&self.state.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleTable {
    rows: Vec<ModuleRow>,
}

impl ModuleTable {
    /// 列之间至少两个空格，单个空格属于列内容（如 `IOS XR RUN`）
    pub fn parse(output: &str) -> Self {
        let (Some(row_re), Some(gap_re)) = (ROW.as_ref(), COLUMN_GAP.as_ref()) else {
            return Self::default();
        };

        let rows = output
            .lines()
            .filter_map(|line| {
                let caps = row_re.captures(line.trim())?;
                let node = caps.get(1)?.as_str().to_string();
                let fields: Vec<&str> = gap_re
                    .split(caps.get(2)?.as_str().trim())
                    .filter(|f| !f.is_empty())
                    .collect();
                if fields.len() < 2 {
                    return None;
                }
                Some(ModuleRow {
                    node,
                    module_type: fields[0].to_string(),
                    state: fields[1].to_string(),
                    config_state: fields.get(2).map(|s| s.to_string()).unwrap_or_default(),
                })
            })
            .collect();

        Self { rows }
    }

    pub fn rows(&self) -> &[ModuleRow] {
        &self.rows
    }

    pub fn invalid_compute_rows(&self) -> Vec<&ModuleRow> {
        self.rows
            .iter()
            .filter(|row| row.is_compute() && !row.is_valid())
            .collect()
    }

    /// 至少一个模块处于 `IOS XR RUN`，且所有计算节点状态有效
    pub fn is_fully_booted(&self) -> bool {
        let any_running = self.rows.iter().any(|row| row.state == FULLY_BOOTED_STATE);
        any_running && self.invalid_compute_rows().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOTED: &str = "\
Node            Type                      State            Config State
-----------------------------------------------------------------------------
0/RP0/CPU0      NCS-55A1-24H(Active)      IOS XR RUN       NSHUT
0/RP0/NPU0      Slice                     UP
0/FT0           NC55-A1-FAN-RV            OPERATIONAL      NSHUT
0/PM0           NC55-1200W-ACFW           OPERATIONAL      NSHUT
";

    const BOOTING: &str = "\
Node            Type                      State            Config State
0/RP0/CPU0      NCS-55A1-24H(Active)      IOS XR RUN       NSHUT
0/1/CPU0        NC55-36X100G              BOOTING          NSHUT
";

    #[test]
    fn test_parse_rows() {
        let table = ModuleTable::parse(BOOTED);
        assert_eq!(table.rows().len(), 4);
        let rp = &table.rows()[0];
        assert_eq!(rp.node, "0/RP0/CPU0");
        assert_eq!(rp.state, "IOS XR RUN");
        assert_eq!(rp.config_state, "NSHUT");
        assert!(rp.is_compute());
    }

    #[test]
    fn test_fully_booted() {
        assert!(ModuleTable::parse(BOOTED).is_fully_booted());

        let booting = ModuleTable::parse(BOOTING);
        assert!(!booting.is_fully_booted());
        assert_eq!(booting.invalid_compute_rows()[0].node, "0/1/CPU0");
    }

    #[test]
    fn test_failed_compute_node_is_degraded() {
        let output = "0/RP0/CPU0      A9K-RSP440-SE(Active)     IOS XR RUN       PWR,NSHUT,MON\n\
                      0/0/CPU0        A9K-MOD80-SE              FAILED           PWR,NSHUT,MON";
        assert!(!ModuleTable::parse(output).is_fully_booted());
    }

    #[test]
    fn test_empty_output_is_not_booted() {
        assert!(!ModuleTable::parse("").is_fully_booted());
    }
}
