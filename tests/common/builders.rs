//! Test data builders for creating test pipelines

use flowline::pipeline::{with_disable_pool, with_pool_size, Pipeline, RunOption, Unit};

/// Builder for string pipelines whose stages each append one marker
pub struct PipelineBuilder {
    buffer_size: usize,
    markers: Vec<String>,
    pool_size: Option<usize>,
    pooled: bool,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            buffer_size: 4,
            markers: Vec::new(),
            pool_size: None,
            pooled: true,
        }
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Add a stage appending `marker` to the payload
    pub fn append(mut self, marker: &str) -> Self {
        self.markers.push(marker.to_string());
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn without_pool(mut self) -> Self {
        self.pooled = false;
        self
    }

    /// Options to hand to `Pipeline::run`
    pub fn options(&self) -> Vec<RunOption> {
        let mut options = Vec::new();
        if let Some(size) = self.pool_size {
            options.push(with_pool_size(size));
        }
        if !self.pooled {
            options.push(with_disable_pool());
        }
        options
    }

    /// Build the pipeline and return it with its run options
    pub fn build(self) -> (Pipeline<String>, Vec<RunOption>) {
        let options = self.options();
        let mut pipeline = Pipeline::new(self.buffer_size);
        for marker in self.markers {
            pipeline
                .tail()
                .then(move |unit: &mut Unit<String>| unit.payload_mut().push_str(&marker));
        }
        (pipeline, options)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_builder() {
        let builder = PipelineBuilder::new().append("A").append("B").pool_size(2);
        assert_eq!(builder.options().len(), 1);

        let (pipeline, _) = builder.build();
        // root plus two stages
        assert_eq!(pipeline.chain().len(), 3);
        assert_eq!(pipeline.buffer_size(), 4);
    }
}
