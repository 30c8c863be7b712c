//! Algorithm sections and traversal phases.
//!
//! The [`AlgorithmSection`] is the run-wide tag every solver reads to decide
//! whether its patches send or compute during the active traversal. A
//! [`Phase`] names the traversal adapter the orchestrator switches to; each
//! phase runs inside exactly one section.

/// Run-wide tag gating which patches communicate and compute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlgorithmSection {
    /// Regular fused or unfused stepping.
    #[default]
    TimeStepping,
    /// Rerun of the prediction after a stability violation; every patch sends.
    PredictionRerunAllSend,
    LimiterStatusSpreading,
    MeshRefinement,
    /// First traversal after a topology change; every patch sends.
    MeshRefinementAllSend,
    MeshRefinementOrLocalOrGlobalRecomputation,
    MeshRefinementOrGlobalRecomputation,
    LocalRecomputationAllSend,
    GlobalRecomputationAllSend,
}

impl AlgorithmSection {
    /// Sections in which every patch sends, regardless of its state.
    pub fn is_all_send(self) -> bool {
        matches!(
            self,
            AlgorithmSection::PredictionRerunAllSend
                | AlgorithmSection::MeshRefinementAllSend
                | AlgorithmSection::LocalRecomputationAllSend
                | AlgorithmSection::GlobalRecomputationAllSend
        )
    }
}

/// Traversal adapters the orchestrator can switch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    MeshRefinement,
    FinaliseMeshRefinementAndTimeStepSizeComputation,
    FinaliseMeshRefinementAndReinitialisation,
    PredictionAndFusedTimeSteppingInitialisation,
    PredictionAndFusedTimeSteppingInitialisationAndPlot,
    Prediction,
    PredictionAndPlot,
    PredictionRerun,
    FusedTimeStep,
    PlotAndFusedTimeStep,
    NeighbourDataMerging,
    NeighbourDataDropping,
    SolutionUpdate,
    TimeStepSizeComputation,
    LimiterStatusSpreading,
    LocalRecomputationAndTimeStepSizeComputation,
}

impl Phase {
    pub const ALL: [Phase; 16] = [
        Phase::MeshRefinement,
        Phase::FinaliseMeshRefinementAndTimeStepSizeComputation,
        Phase::FinaliseMeshRefinementAndReinitialisation,
        Phase::PredictionAndFusedTimeSteppingInitialisation,
        Phase::PredictionAndFusedTimeSteppingInitialisationAndPlot,
        Phase::Prediction,
        Phase::PredictionAndPlot,
        Phase::PredictionRerun,
        Phase::FusedTimeStep,
        Phase::PlotAndFusedTimeStep,
        Phase::NeighbourDataMerging,
        Phase::NeighbourDataDropping,
        Phase::SolutionUpdate,
        Phase::TimeStepSizeComputation,
        Phase::LimiterStatusSpreading,
        Phase::LocalRecomputationAndTimeStepSizeComputation,
    ];

    /// Fused time steps, with or without plotting.
    pub fn is_time_stepping(self) -> bool {
        matches!(self, Phase::FusedTimeStep | Phase::PlotAndFusedTimeStep)
    }

    /// Phases that advance the solution and reduce a new step size.
    pub fn advances_solution(self) -> bool {
        matches!(
            self,
            Phase::FusedTimeStep
                | Phase::PlotAndFusedTimeStep
                | Phase::SolutionUpdate
                | Phase::LocalRecomputationAndTimeStepSizeComputation
        )
    }

    /// Phases whose end starts a new solver-global time step.
    pub fn starts_new_time_step(self) -> bool {
        matches!(
            self,
            Phase::FusedTimeStep
                | Phase::PlotAndFusedTimeStep
                | Phase::FinaliseMeshRefinementAndTimeStepSizeComputation
                | Phase::TimeStepSizeComputation
        )
    }

    pub fn plots(self) -> bool {
        matches!(
            self,
            Phase::PredictionAndFusedTimeSteppingInitialisationAndPlot
                | Phase::PredictionAndPlot
                | Phase::PlotAndFusedTimeStep
        )
    }

    /// Section the orchestrator activates before running this phase.
    pub fn section(self) -> AlgorithmSection {
        match self {
            Phase::MeshRefinement
            | Phase::FinaliseMeshRefinementAndTimeStepSizeComputation
            | Phase::FinaliseMeshRefinementAndReinitialisation => AlgorithmSection::MeshRefinement,
            Phase::PredictionRerun => AlgorithmSection::PredictionRerunAllSend,
            Phase::LimiterStatusSpreading => AlgorithmSection::LimiterStatusSpreading,
            Phase::LocalRecomputationAndTimeStepSizeComputation => {
                AlgorithmSection::LocalRecomputationAllSend
            }
            _ => AlgorithmSection::TimeStepping,
        }
    }
}
