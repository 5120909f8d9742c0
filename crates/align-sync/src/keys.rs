use crate::dispatch::Command;
use crate::store::SessionView;

/// Where keyboard focus sits when a key arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    Controls,
    /// A text field or selector; keys belong to it.
    TextEntry,
}

/// Maps a key press to a command. `None` means nothing is sent.
pub fn route_key(view: &SessionView, key: char, focus: Focus) -> Option<Command> {
    if focus == Focus::TextEntry {
        return None;
    }
    match key {
        ' ' if view.running() => Some(Command::Stop),
        ' ' => Some(Command::Start),
        '+' | '=' => Some(Command::Move(1)),
        '-' | '_' => Some(Command::Move(-1)),
        '1'..='8' => key
            .to_digit(10)
            .map(|slot| Command::Jump(slot as u8)),
        'h' | 'H' if view.running() => {
            let head = view.state.current_head.unwrap_or(view.position.head);
            Some(Command::SetHead(if head == 0 { 1 } else { 0 }))
        }
        'r' | 'R' => Some(Command::Recalibrate),
        'a' | 'A' => Some(Command::Analyze),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SessionState;
    use crate::model::Position;

    fn view(running: bool, head: u8) -> SessionView {
        SessionView {
            state: SessionState {
                is_running: Some(running),
                current_track: Some(10),
                current_head: Some(head),
                ..SessionState::default()
            },
            position: Position::new(10, head),
            ..SessionView::default()
        }
    }

    #[test]
    fn space_toggles_session() {
        assert_eq!(route_key(&view(false, 0), ' ', Focus::Controls), Some(Command::Start));
        assert_eq!(route_key(&view(true, 0), ' ', Focus::Controls), Some(Command::Stop));
    }

    #[test]
    fn text_entry_swallows_keys() {
        for key in [' ', '1', '+', 'r', 'a', 'h'] {
            assert_eq!(route_key(&view(true, 0), key, Focus::TextEntry), None);
        }
    }

    #[test]
    fn digits_and_steps() {
        let idle = view(false, 0);
        assert_eq!(route_key(&idle, '1', Focus::Controls), Some(Command::Jump(1)));
        assert_eq!(route_key(&idle, '8', Focus::Controls), Some(Command::Jump(8)));
        assert_eq!(route_key(&idle, '9', Focus::Controls), None);
        assert_eq!(route_key(&idle, '0', Focus::Controls), None);
        assert_eq!(route_key(&idle, '=', Focus::Controls), Some(Command::Move(1)));
        assert_eq!(route_key(&idle, '_', Focus::Controls), Some(Command::Move(-1)));
    }

    #[test]
    fn head_toggle_requires_running_session() {
        assert_eq!(route_key(&view(false, 0), 'h', Focus::Controls), None);
        assert_eq!(
            route_key(&view(true, 0), 'h', Focus::Controls),
            Some(Command::SetHead(1))
        );
        assert_eq!(
            route_key(&view(true, 1), 'H', Focus::Controls),
            Some(Command::SetHead(0))
        );
    }

    #[test]
    fn letters_are_case_insensitive() {
        let idle = view(false, 0);
        assert_eq!(route_key(&idle, 'R', Focus::Controls), Some(Command::Recalibrate));
        assert_eq!(route_key(&idle, 'a', Focus::Controls), Some(Command::Analyze));
        assert_eq!(route_key(&idle, 'x', Focus::Controls), None);
    }
}
