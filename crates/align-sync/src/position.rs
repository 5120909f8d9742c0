use crate::fragment::SessionState;
use crate::model::Position;
use crate::persist::StateFile;

/// Last known head position, used when the session has not reported one.
#[derive(Debug)]
pub struct PositionCache {
    current: Position,
    file: Option<StateFile>,
}

impl PositionCache {
    pub fn in_memory(seed: Position) -> Self {
        Self {
            current: seed,
            file: None,
        }
    }

    /// Seeds from the state file, falling back to track 0 head 0.
    pub fn load(file: StateFile) -> Self {
        let current = match file.load() {
            Ok(state) => state.position.unwrap_or(Position::HOME),
            Err(err) => {
                tracing::warn!(
                    target: "align_sync::position",
                    error = %err,
                    "unable to read cached position"
                );
                Position::HOME
            }
        };
        Self {
            current,
            file: Some(file),
        }
    }

    pub fn get(&self) -> Position {
        self.current
    }

    /// Writes through when the value changes. Persistence failures are logged only.
    pub fn set(&mut self, position: Position) {
        if position == self.current {
            return;
        }
        self.current = position;
        let Some(file) = &self.file else {
            return;
        };
        if let Err(err) = file.update(|state| state.position = Some(position)) {
            tracing::warn!(
                target: "align_sync::position",
                error = %err,
                %position,
                "failed to persist position"
            );
        }
    }

    /// Records the session's coordinates if it defines any.
    pub fn observe(&mut self, state: &SessionState) {
        if state.has_coordinates() {
            self.set(state.position_or(self.current));
        }
    }

    pub fn effective(&self, state: &SessionState) -> Position {
        state.position_or(self.current)
    }
}
