//! Compiled check rules shared between the rule refresher and validator workers

use std::sync::Arc;

use parking_lot::Mutex;
use regex::bytes::Regex;
use tracing::debug;

use crate::error::Result;
use crate::models::CheckSpec;

/// Address used when the outer IP cannot be resolved
pub const FALLBACK_OUTER_IP: &str = "127.0.0.1";

/// A check paired with its compiled response pattern
#[derive(Debug, Clone)]
pub struct CompiledCheck {
    pub spec: CheckSpec,
    pub pattern: Regex,
}

impl CompiledCheck {
    pub fn compile(spec: CheckSpec, outer_ip: &str) -> Result<Self> {
        let pattern = compile_pattern(&spec, outer_ip)?;
        Ok(Self { spec, pattern })
    }
}

/// Compile a check's body pattern; `{ip}` becomes a literal match on `outer_ip`
pub fn compile_pattern(spec: &CheckSpec, outer_ip: &str) -> Result<Regex> {
    let pattern = if spec.matches_outer_ip() {
        Regex::new(&regex::escape(outer_ip))?
    } else {
        Regex::new(&spec.rsp_body_re)?
    };
    Ok(pattern)
}

struct RuleState {
    outer_ip: String,
    compiled: Arc<Vec<CompiledCheck>>,
}

/// The configured checks and their current compiled form
///
/// Every read by a validator and every recompilation goes through one mutex.
pub struct CheckRules {
    specs: Vec<CheckSpec>,
    state: Mutex<RuleState>,
}

impl CheckRules {
    /// Compile `specs` against the fallback IP; fails on any invalid pattern
    pub fn new(specs: Vec<CheckSpec>) -> Result<Self> {
        let compiled = Self::compile_all(&specs, FALLBACK_OUTER_IP)?;
        Ok(Self {
            specs,
            state: Mutex::new(RuleState {
                outer_ip: FALLBACK_OUTER_IP.to_string(),
                compiled: Arc::new(compiled),
            }),
        })
    }

    fn compile_all(specs: &[CheckSpec], outer_ip: &str) -> Result<Vec<CompiledCheck>> {
        specs
            .iter()
            .cloned()
            .map(|spec| CompiledCheck::compile(spec, outer_ip))
            .collect()
    }

    /// Recompile every pattern for a newly resolved outer IP
    ///
    /// On error the previously compiled set stays in place.
    pub fn recompile(&self, outer_ip: &str) -> Result<()> {
        let compiled = Self::compile_all(&self.specs, outer_ip)?;

        let mut state = self.state.lock();
        state.outer_ip = outer_ip.to_string();
        state.compiled = Arc::new(compiled);
        debug!(outer_ip = %outer_ip, checks = self.specs.len(), "Recompiled check rules");
        Ok(())
    }

    /// The compiled checks as of now
    pub fn snapshot(&self) -> Arc<Vec<CompiledCheck>> {
        self.state.lock().compiled.clone()
    }

    pub fn outer_ip(&self) -> String {
        self.state.lock().outer_ip.clone()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
