//! Programmatic DataCollection creation with builder pattern

use std::path::{Path, PathBuf};

use stockdb_protocol::resource::{DataCollection, Metadata, ResourceKind, ScheduleType, Security};

/// Builds a valid interval collection unless told otherwise
pub struct CollectionBuilder {
    collection: DataCollection,
}

impl CollectionBuilder {
    pub fn new(name: &str) -> Self {
        let mut collection = DataCollection {
            api_version: "stockdb.io/v1".to_string(),
            kind: ResourceKind::DataCollection,
            metadata: Metadata {
                name: name.to_string(),
            },
            ..Default::default()
        };
        collection.spec.source.source_type = "fmp".to_string();
        collection.spec.source.endpoint = "historical-price-eod/full".to_string();
        collection.spec.schedule.schedule_type = ScheduleType::Interval;
        collection.spec.schedule.frequency = Some("1d".to_string());
        collection.spec.options.timeout = "30s".to_string();
        collection.spec.options.retries = 3;
        Self { collection }
    }

    pub fn symbol(mut self, symbol: &str) -> Self {
        self.collection.spec.targets.securities.push(Security {
            symbol: symbol.to_string(),
        });
        self
    }

    pub fn schedule(mut self, schedule_type: ScheduleType) -> Self {
        self.collection.spec.schedule.schedule_type = schedule_type;
        self
    }

    pub fn dates(mut self, start: &str, end: &str) -> Self {
        self.collection.spec.schedule.start_date = Some(start.to_string());
        self.collection.spec.schedule.end_date = Some(end.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.collection.spec.options.timeout = timeout.to_string();
        self
    }

    pub fn build(self) -> DataCollection {
        self.collection
    }

    /// Write the collection as YAML into `dir` and return the path
    pub fn write_to_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{}.yaml", self.collection.name()));
        let contents = serde_yaml::to_string(&self.collection).map_err(std::io::Error::other)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
