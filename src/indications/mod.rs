//! Indication builders (§4.F): translate current store state plus an
//! action definition into service-model PDUs. Each builder is a pure
//! function from (store snapshot, action definition) to `IndicationHeader`
//! + `IndicationMessage` pairs — encoding those to wire bytes is the
//! codec plugin's job (§6), not this module's.

pub mod kpm;
pub mod mho;

pub use kpm::{build_kpm_header, build_kpm_message, KpmActionDefinition};
pub use mho::{build_mho_format1, build_mho_format2, build_mho_header};
