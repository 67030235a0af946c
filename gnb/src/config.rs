//! YAML Configuration Structures for the scheduler simulator
//!
//! The cell section follows the srsRAN `cell_cfg` naming; the `ues` and `rars` sections
//! describe the traffic injected into the slot driver.

use anyhow::{bail, Context};
use common::types::{DuplexMode, Pci, Rnti, SubcarrierSpacing, TddPattern};
use layers::mac::{
    BwpConfig, Coreset0Config, CoresetConfig, DciFormat, PdcchConfig, RarRequest, RbgSizeConfig,
    ResourceAllocationType, SearchSpaceConfig, SearchSpaceType, Sib1SchedConfig, UeCarrierParams, UeSchedConfig,
};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// Cell configuration
    pub cell_cfg: CellConfig,
    /// PDCCH configuration
    #[serde(default)]
    pub pdcch: PdcchYamlConfig,
    /// SIB1 broadcast, disabled when absent
    #[serde(default)]
    pub sib1: Option<Sib1Config>,
    /// Simulated UEs
    #[serde(default)]
    pub ues: Vec<UeConfig>,
    /// Random access responses to send
    #[serde(default)]
    pub rars: Vec<RarConfig>,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Duplex mode selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplexKind {
    #[default]
    Fdd,
    Tdd,
}

/// TDD pattern in slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TddConfig {
    pub period_slots: u32,
    pub dl_slots: u32,
    #[serde(default)]
    pub special_slots: u32,
    pub ul_slots: u32,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Physical Cell ID
    pub pci: u16,
    /// Common subcarrier spacing in kHz
    #[serde(default = "default_common_scs")]
    pub common_scs: u32,
    /// BWP width in PRBs
    pub nof_prb: u32,
    /// First CRB of the BWP
    #[serde(default)]
    pub bwp_start_rb: u32,
    #[serde(default)]
    pub duplex: DuplexKind,
    /// Required when `duplex` is `tdd`
    #[serde(default)]
    pub tdd: Option<TddConfig>,
    #[serde(default)]
    pub rbg_config: RbgSizeConfig,
    /// Capacity of each slot's PDSCH and PUSCH grant lists
    #[serde(default = "default_max_grants_per_slot")]
    pub max_grants_per_slot: usize,
}

fn default_common_scs() -> u32 {
    15
}

fn default_max_grants_per_slot() -> usize {
    16
}

/// PDCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdcchYamlConfig {
    /// CORESET#0 index (TS 38.213 Table 13-1)
    #[serde(default = "default_coreset0_index")]
    pub coreset0_index: u8,
    /// Additional CORESETs
    #[serde(default)]
    pub coresets: Vec<CoresetYamlConfig>,
    /// Search spaces, SearchSpace#0 and #1 on CORESET#0 when empty
    #[serde(default)]
    pub search_spaces: Vec<SearchSpaceYamlConfig>,
    /// ra-SearchSpace
    #[serde(default = "default_ra_search_space")]
    pub ra_search_space: Option<u8>,
}

impl Default for PdcchYamlConfig {
    fn default() -> Self {
        Self {
            coreset0_index: default_coreset0_index(),
            coresets: Vec::new(),
            search_spaces: Vec::new(),
            ra_search_space: default_ra_search_space(),
        }
    }
}

fn default_coreset0_index() -> u8 {
    1
}

fn default_ra_search_space() -> Option<u8> {
    Some(1)
}

/// CORESET configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoresetYamlConfig {
    pub id: u8,
    /// frequencyDomainResources, one `0`/`1` character per 6-PRB group
    pub freq_domain_resources: String,
    #[serde(default)]
    pub offset_rb: u32,
    #[serde(default = "default_coreset_duration")]
    pub duration: u8,
}

fn default_coreset_duration() -> u8 {
    1
}

/// Search space configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSpaceYamlConfig {
    pub id: u8,
    pub coreset_id: u8,
    #[serde(rename = "type")]
    pub ss_type: SearchSpaceType,
    /// DCI formats monitored in this search space
    #[serde(default = "default_dci_formats")]
    pub dci_formats: Vec<DciFormat>,
}

fn default_dci_formats() -> Vec<DciFormat> {
    vec![DciFormat::Format00, DciFormat::Format10]
}

/// SIB1 scheduling
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Sib1Config {
    #[serde(default = "default_sib1_period_slots")]
    pub period_slots: u32,
    #[serde(default = "default_sib1_nof_prb")]
    pub nof_prb: u32,
}

fn default_sib1_period_slots() -> u32 {
    160
}

fn default_sib1_nof_prb() -> u32 {
    4
}

/// Simulated UE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub rnti: u16,
    pub ss_id: u8,
    #[serde(default)]
    pub dl_prbs: u32,
    #[serde(default)]
    pub ul_prbs: u32,
    #[serde(default = "default_dl_dci_format")]
    pub dl_dci_format: DciFormat,
    /// resourceAllocation for both PDSCH and PUSCH
    #[serde(default)]
    pub ra_type: ResourceAllocationType,
}

fn default_dl_dci_format() -> DciFormat {
    DciFormat::Format10
}

/// Random access response
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RarConfig {
    /// Absolute slot from which the RAR may be sent
    pub slot: u32,
    pub ra_rnti: u16,
    pub tc_rnti: u16,
    #[serde(default = "default_rar_nof_prb")]
    pub nof_prb: u32,
    #[serde(default = "default_msg3_prbs")]
    pub msg3_prbs: u32,
}

fn default_rar_nof_prb() -> u32 {
    4
}

fn default_msg3_prbs() -> u32 {
    3
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// MAC layer log level
    #[serde(default = "default_log_level")]
    pub mac_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            mac_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SimConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        Self::from_yaml_str(&contents).with_context(|| format!("Failed to parse {}", path))
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn pci(&self) -> anyhow::Result<Pci> {
        Pci::new(self.cell_cfg.pci).with_context(|| format!("Invalid PCI: {}", self.cell_cfg.pci))
    }

    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.cell_cfg.common_scs)
            .with_context(|| format!("Invalid subcarrier spacing: {} kHz", self.cell_cfg.common_scs))
    }

    pub fn duplex(&self) -> anyhow::Result<DuplexMode> {
        match (self.cell_cfg.duplex, self.cell_cfg.tdd) {
            (DuplexKind::Fdd, _) => Ok(DuplexMode::Fdd),
            (DuplexKind::Tdd, Some(tdd)) => Ok(DuplexMode::Tdd(TddPattern {
                period_slots: tdd.period_slots,
                dl_slots: tdd.dl_slots,
                special_slots: tdd.special_slots,
                ul_slots: tdd.ul_slots,
            })),
            (DuplexKind::Tdd, None) => bail!("TDD duplex requires a tdd pattern"),
        }
    }

    fn search_spaces(&self) -> Vec<SearchSpaceYamlConfig> {
        if !self.pdcch.search_spaces.is_empty() {
            return self.pdcch.search_spaces.clone();
        }
        (0..2)
            .map(|id| SearchSpaceYamlConfig {
                id,
                coreset_id: 0,
                ss_type: SearchSpaceType::Common,
                dci_formats: default_dci_formats(),
            })
            .collect()
    }

    /// Cell PDCCH and BWP parameters, to be validated by `BwpParams::new`
    pub fn bwp_config(&self) -> anyhow::Result<BwpConfig> {
        let mut pdcch = PdcchConfig::default();
        let coreset0 = Coreset0Config::from_index(self.pdcch.coreset0_index)?;
        pdcch.add_coreset(coreset0.to_coreset());

        for cs in &self.pdcch.coresets {
            if cs.id == 0 {
                bail!("CORESET#0 is configured through coreset0_index");
            }
            let freq_resources = CoresetConfig::parse_freq_resources(&cs.freq_domain_resources)
                .with_context(|| format!("CORESET#{}", cs.id))?;
            pdcch.add_coreset(CoresetConfig {
                id: cs.id,
                freq_resources,
                offset_rb: cs.offset_rb,
                duration: cs.duration,
            });
        }
        for ss in self.search_spaces() {
            pdcch.add_search_space(SearchSpaceConfig {
                id: ss.id,
                coreset_id: ss.coreset_id,
                ss_type: ss.ss_type,
            });
        }
        pdcch.ra_search_space = self.pdcch.ra_search_space;

        Ok(BwpConfig {
            bwp_id: 0,
            start_rb: self.cell_cfg.bwp_start_rb,
            nof_prb: self.cell_cfg.nof_prb,
            rbg_size: self.cell_cfg.rbg_config,
            duplex: self.duplex()?,
            max_grants_per_slot: self.cell_cfg.max_grants_per_slot,
            pdcch,
        })
    }

    pub fn sib1_config(&self) -> Option<Sib1SchedConfig> {
        self.sib1.map(|cfg| Sib1SchedConfig {
            period_slots: cfg.period_slots,
            nof_prb: cfg.nof_prb,
        })
    }

    /// UEs checked against the formats monitored in their search space
    pub fn ue_configs(&self) -> anyhow::Result<Vec<UeSchedConfig>> {
        let search_spaces = self.search_spaces();
        self.ues
            .iter()
            .map(|cfg| {
                let ss = search_spaces
                    .iter()
                    .find(|ss| ss.id == cfg.ss_id)
                    .with_context(|| format!("UE rnti={} uses unknown SearchSpace#{}", cfg.rnti, cfg.ss_id))?;
                if !ss.dci_formats.contains(&cfg.dl_dci_format) {
                    bail!(
                        "SearchSpace#{} does not monitor DCI format {:?} of rnti={}",
                        ss.id,
                        cfg.dl_dci_format,
                        cfg.rnti
                    );
                }
                let mut ue = UeCarrierParams::new(Rnti::new(cfg.rnti));
                ue.pdsch_ra_type = cfg.ra_type;
                ue.pusch_ra_type = cfg.ra_type;
                Ok(UeSchedConfig {
                    ue,
                    ss_id: cfg.ss_id,
                    dl_prbs: cfg.dl_prbs,
                    ul_prbs: cfg.ul_prbs,
                    dl_format: cfg.dl_dci_format,
                })
            })
            .collect()
    }

    pub fn rar_requests(&self) -> Vec<RarRequest> {
        self.rars
            .iter()
            .map(|rar| RarRequest {
                slot: rar.slot,
                ra_rnti: Rnti::new(rar.ra_rnti),
                tc_rnti: Rnti::new(rar.tc_rnti),
                nof_prb: rar.nof_prb,
                msg3_prbs: rar.msg3_prbs,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::mac::BwpParams;

    const SAMPLE: &str = r#"
cell_cfg:
  pci: 1
  common_scs: 15
  nof_prb: 52
  duplex: tdd
  tdd:
    period_slots: 5
    dl_slots: 3
    special_slots: 1
    ul_slots: 1
  rbg_config: config2
pdcch:
  coreset0_index: 1
  coresets:
    - id: 2
      freq_domain_resources: "11111111"
  search_spaces:
    - id: 0
      coreset_id: 0
      type: common
    - id: 1
      coreset_id: 0
      type: common
    - id: 2
      coreset_id: 2
      type: ue
      dci_formats: ["0_1", "1_1"]
sib1:
  period_slots: 20
ues:
  - rnti: 17921
    ss_id: 2
    dl_prbs: 20
    dl_dci_format: "1_1"
    ra_type: dynamic_switch
rars:
  - slot: 4
    ra_rnti: 16
    tc_rnti: 17922
log:
  mac_level: debug
"#;

    #[test]
    fn test_parse_sample() {
        let cfg = SimConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.pci().unwrap(), Pci(1));
        assert_eq!(cfg.scs().unwrap(), SubcarrierSpacing::Scs15);
        assert_eq!(cfg.cell_cfg.max_grants_per_slot, 16);
        assert_eq!(cfg.log.mac_level, "debug");
        assert_eq!(cfg.sib1_config().unwrap().nof_prb, 4);

        let bwp = BwpParams::new(cfg.bwp_config().unwrap()).unwrap();
        assert_eq!(bwp.nof_prb(), 52);
        assert_eq!(bwp.rbg.nominal_size(), 8);
        assert!(matches!(bwp.duplex, DuplexMode::Tdd(p) if p.ul_slots == 1));
        // CORESET#0 index 1: 24 PRBs at offset 2
        assert_eq!(bwp.coreset_prb_range(0).unwrap().start(), 2);
        assert_eq!(bwp.coreset_prb_range(0).unwrap().length(), 24);
        assert_eq!(bwp.coreset_prb_range(2).unwrap().length(), 48);
        assert_eq!(bwp.pdcch.ra_search_space, Some(1));

        let ues = cfg.ue_configs().unwrap();
        assert_eq!(ues.len(), 1);
        assert_eq!(ues[0].ue.rnti, Rnti(17921));
        assert_eq!(ues[0].ue.pusch_ra_type, ResourceAllocationType::DynamicSwitch);
        assert_eq!(ues[0].ul_format(), DciFormat::Format01);

        let rars = cfg.rar_requests();
        assert_eq!(rars[0].tc_rnti, Rnti(17922));
        assert_eq!(rars[0].msg3_prbs, 3);
    }

    #[test]
    fn test_defaults() {
        let cfg = SimConfig::from_yaml_str("cell_cfg:\n  pci: 500\n  nof_prb: 106\n").unwrap();
        assert!(cfg.sib1_config().is_none());
        assert_eq!(cfg.log.mac_level, "info");
        let bwp = BwpParams::new(cfg.bwp_config().unwrap()).unwrap();
        assert_eq!(bwp.duplex, DuplexMode::Fdd);
        assert!(bwp.pdcch.search_space(0).is_some());
        assert!(bwp.pdcch.search_space(1).is_some());
    }

    #[test]
    fn test_invalid_configs() {
        let tdd_without_pattern = "cell_cfg:\n  pci: 1\n  nof_prb: 52\n  duplex: tdd\n";
        let cfg = SimConfig::from_yaml_str(tdd_without_pattern).unwrap();
        assert!(cfg.bwp_config().is_err());

        let bad_scs = "cell_cfg:\n  pci: 1\n  nof_prb: 52\n  common_scs: 20\n";
        assert!(SimConfig::from_yaml_str(bad_scs).unwrap().scs().is_err());

        let bad_pci = "cell_cfg:\n  pci: 1008\n  nof_prb: 52\n";
        assert!(SimConfig::from_yaml_str(bad_pci).unwrap().pci().is_err());

        // Format 1_1 is not monitored by the default common search spaces
        let bad_ue = "cell_cfg:\n  pci: 1\n  nof_prb: 52\nues:\n  - rnti: 17921\n    ss_id: 1\n    dl_dci_format: \"1_1\"\n";
        assert!(SimConfig::from_yaml_str(bad_ue).unwrap().ue_configs().is_err());

        assert!(SimConfig::from_yaml_file("/nonexistent/sim.yml").is_err());
    }

    #[test]
    fn test_shipped_config() {
        let cfg = SimConfig::from_yaml_str(include_str!("../config/sch_sim.yml")).unwrap();
        BwpParams::new(cfg.bwp_config().unwrap()).unwrap();
        assert_eq!(cfg.ue_configs().unwrap().len(), 2);
        assert_eq!(cfg.rar_requests().len(), 1);
    }
}
