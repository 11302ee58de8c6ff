use flexstr::SharedStr as FlexStr;

pub type GeneSymbol = FlexStr;
pub type EnsemblId = FlexStr;
pub type DfKey = FlexStr;

pub type ConditionName = FlexStr;
pub type ReplicateColumn = FlexStr;

pub type TierName = FlexStr;
pub type UserId = FlexStr;

pub type CollectionName = FlexStr;
pub type AnalysisId = i64;
