//! # Pipeline Engine
//!
//! Runs an ordered list of [`Stage`]s once per message. The output of each stage is the
//! input of the next; the first failure stops the run and is returned unchanged.
//!
//! ## Typical Layout
//! ```text
//! DecodeTlv -> Decompress -> Handler -> Compress -> EncodeTlv
//! ```

use crate::config::ServerConfig;
use crate::core::connection::Connection;
use crate::error::{PipelineError, Result};
use crate::pipeline::stage::{HandlerContext, Stage, StageContext};
use crate::utils::metrics::Timer;
use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Immutable, shareable stage list
#[derive(Clone, Debug)]
pub struct Pipeline {
    stages: Arc<[Stage]>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Decode, optionally decompress, handle, optionally compress, encode.
    ///
    /// The framing stages follow the discipline of `config`.
    pub fn standard<F>(config: &ServerConfig, compressed: bool, handler: F) -> Self
    where
        F: Fn(&HandlerContext<'_>, &[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        let (decode, encode) = match config.framing().discipline() {
            crate::config::Discipline::Tlv => (Stage::DecodeTlv, Stage::EncodeTlv),
            crate::config::Discipline::EndMarker => {
                (Stage::DecodeEndMarker, Stage::EncodeEndMarker)
            }
        };

        let mut builder = Self::builder().stage(decode);
        if compressed {
            builder = builder.stage(Stage::Decompress);
        }
        builder = builder.handler("handler", handler);
        if compressed {
            builder = builder.stage(Stage::Compress);
        }
        builder.stage(encode).build()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check that the pipeline can run under `config`.
    ///
    /// # Errors
    /// `ConfigError` for an empty pipeline or a framing stage of the other discipline.
    pub fn validate(&self, config: &ServerConfig) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::ConfigError(
                "Pipeline has no stages".to_string(),
            ));
        }
        let configured = config.framing().discipline();
        if let Some(stage) = self
            .stages
            .iter()
            .find(|stage| stage.discipline().is_some_and(|d| d != configured))
        {
            return Err(PipelineError::ConfigError(format!(
                "Stage '{}' does not match the configured {:?} framing",
                stage.name(),
                configured
            )));
        }
        Ok(())
    }

    /// Run every stage once, in order, starting from `input`.
    ///
    /// Each stage gets a fresh scratch buffer from the context's pool, released as soon
    /// as the stage returns.
    ///
    /// # Errors
    /// The error of the first failing stage; later stages do not run.
    pub async fn run<S>(
        &self,
        ctx: &StageContext,
        conn: &mut Connection<S>,
        input: Bytes,
    ) -> Result<Bytes>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Waiting on the peer in a decode stage is not processing time
        let mut timer: Option<Timer> = None;
        let mut data = input;
        for stage in self.stages.iter() {
            if timer.is_none() && !stage.reads_connection() {
                timer = Some(Timer::start("pipeline_run"));
            }
            let mut scratch = ctx.buffers().acquire();
            let result = stage.execute(ctx, conn, data, &mut scratch).await;
            drop(scratch);

            data = match result {
                Ok(output) => output,
                Err(e) => {
                    debug!(stage = stage.name(), error = %e, "Pipeline stage failed");
                    return Err(e);
                }
            };
        }
        if let Some(timer) = &timer {
            ctx.metrics().record_processing(timer.elapsed());
        }
        Ok(data)
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self::new(stages)
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn handler<F>(self, name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(&HandlerContext<'_>, &[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.stage(Stage::handler(name, handler))
    }

    pub fn build(self) -> Pipeline {
        Pipeline::new(self.stages)
    }
}
