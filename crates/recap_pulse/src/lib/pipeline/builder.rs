use std::sync::Arc;

use recap_datastore::CacheStore;
use tokio::sync::Semaphore;

use crate::{
    config::PipelineConfig,
    llm::{Generator, Transcriber},
    media::{MediaHandler, SlideRenderer},
    SummaryPipeline,
};

/// Builder for [`SummaryPipeline`]. Each dependency is its own type
/// parameter, so `build` is only callable once every seam is filled.
pub struct SummaryPipelineBuilder<D = (), T = (), G = (), M = (), R = ()> {
    config: PipelineConfig,
    store: D,
    transcriber: T,
    generator: G,
    media: M,
    slides: R,
}

impl SummaryPipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            store: (),
            transcriber: (),
            generator: (),
            media: (),
            slides: (),
        }
    }
}

impl<D, T, G, M, R> SummaryPipelineBuilder<D, T, G, M, R> {
    pub fn store<D2: CacheStore + Send + Sync + 'static>(
        self,
        store: D2,
    ) -> SummaryPipelineBuilder<D2, T, G, M, R> {
        SummaryPipelineBuilder {
            config: self.config,
            store,
            transcriber: self.transcriber,
            generator: self.generator,
            media: self.media,
            slides: self.slides,
        }
    }

    pub fn transcriber<T2: Transcriber + Send + Sync + 'static>(
        self,
        transcriber: T2,
    ) -> SummaryPipelineBuilder<D, T2, G, M, R> {
        SummaryPipelineBuilder {
            config: self.config,
            store: self.store,
            transcriber,
            generator: self.generator,
            media: self.media,
            slides: self.slides,
        }
    }

    pub fn generator<G2: Generator + Send + Sync + 'static>(
        self,
        generator: G2,
    ) -> SummaryPipelineBuilder<D, T, G2, M, R> {
        SummaryPipelineBuilder {
            config: self.config,
            store: self.store,
            transcriber: self.transcriber,
            generator,
            media: self.media,
            slides: self.slides,
        }
    }

    pub fn media_handler<M2: MediaHandler + Send + Sync + 'static>(
        self,
        media: M2,
    ) -> SummaryPipelineBuilder<D, T, G, M2, R> {
        SummaryPipelineBuilder {
            config: self.config,
            store: self.store,
            transcriber: self.transcriber,
            generator: self.generator,
            media,
            slides: self.slides,
        }
    }

    pub fn slide_renderer<R2: SlideRenderer + Send + Sync + 'static>(
        self,
        slides: R2,
    ) -> SummaryPipelineBuilder<D, T, G, M, R2> {
        SummaryPipelineBuilder {
            config: self.config,
            store: self.store,
            transcriber: self.transcriber,
            generator: self.generator,
            media: self.media,
            slides,
        }
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self
    }
}

impl<D, T, G, M, R> SummaryPipelineBuilder<D, T, G, M, R>
where
    D: CacheStore + Send + Sync + 'static,
    T: Transcriber + Send + Sync + 'static,
    G: Generator + Send + Sync + 'static,
    M: MediaHandler + Send + Sync + 'static,
    R: SlideRenderer + Send + Sync + 'static,
{
    pub fn build(self) -> SummaryPipeline<D, T, G, M, R> {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        SummaryPipeline {
            config: self.config,
            store: self.store,
            transcriber: self.transcriber,
            generator: self.generator,
            media: self.media,
            slides: self.slides,
            slots,
        }
    }
}
