use std::sync::Arc;

use coda_core::config::CodaConfig;
use coda_core::paths::DataLayout;
use coda_memory::MemoryService;
use coda_perf::PerfTracker;

use crate::provider::LlmClient;
use crate::speech::{SttControl, TtsEngine};
use crate::telemetry::Telemetry;
use crate::tools::ToolRouter;

/// Everything the orchestrator needs, assembled once at startup and
/// passed explicitly. No component-level globals: the perf tracker is
/// the only getter singleton in the process, and even here it travels
/// inside [`Telemetry`].
pub struct CoreServices {
    pub config: CodaConfig,
    pub layout: DataLayout,
    pub telemetry: Telemetry,
    pub perf: Arc<PerfTracker>,
    pub memory: Arc<MemoryService>,
    pub tools: Arc<ToolRouter>,
    pub llm: Arc<dyn LlmClient>,
    pub tts: Arc<dyn TtsEngine>,
    pub stt: Arc<dyn SttControl>,
}
