use tidepool_core::{Session, SessionId, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub is_active: bool,
}

/// Read-only projection of the registry plus the client's selection.
///
/// Rebuilt from a listing every time the registry changes; the only local
/// edits are the selection flag and status flips observed on the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    entries: Vec<SummaryEntry>,
}

impl SessionSummary {
    pub fn recompute(&mut self, sessions: &[Session], active: Option<&SessionId>) {
        self.entries = sessions
            .iter()
            .map(|session| SummaryEntry {
                id: session.id.clone(),
                name: session.display_name.clone(),
                status: session.status,
                is_active: active == Some(&session.id),
            })
            .collect();
    }

    /// Appends an acknowledged session the last listing has not seen yet.
    pub fn insert(&mut self, session: &Session, active: Option<&SessionId>) -> bool {
        if self.contains(&session.id) {
            return false;
        }
        self.entries.push(SummaryEntry {
            id: session.id.clone(),
            name: session.display_name.clone(),
            status: session.status,
            is_active: active == Some(&session.id),
        });
        true
    }

    pub fn remove(&mut self, id: &SessionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.id != id);
        self.entries.len() != before
    }

    pub fn select(&mut self, active: Option<&SessionId>) {
        for entry in &mut self.entries {
            entry.is_active = active == Some(&entry.id);
        }
    }

    /// Returns true when the entry exists and its status actually changed.
    pub fn set_status(&mut self, id: &SessionId, status: SessionStatus) -> bool {
        match self.entries.iter_mut().find(|entry| &entry.id == id) {
            Some(entry) if entry.status != status => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    pub fn active(&self) -> Option<&SummaryEntry> {
        self.entries.iter().find(|entry| entry.is_active)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.iter().any(|entry| &entry.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Neighbour of `from` in listing order, wrapping around. `step` is +1
    /// or -1; without a current position the first entry is returned.
    pub fn neighbour(&self, from: Option<&SessionId>, step: isize) -> Option<&SessionId> {
        if self.entries.is_empty() {
            return None;
        }
        let len = self.entries.len() as isize;
        let index = match from.and_then(|id| self.entries.iter().position(|e| &e.id == id)) {
            Some(pos) => (pos as isize + step).rem_euclid(len),
            None => 0,
        };
        self.entries.get(index as usize).map(|entry| &entry.id)
    }

    pub fn render_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{} {:<36}  {:<12}  {}",
                    if entry.is_active { '*' } else { ' ' },
                    entry.id.as_str(),
                    entry.name,
                    entry.status
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::ProjectId;

    fn session(id: &str, name: &str) -> Session {
        Session::new(SessionId::from(id), ProjectId::from("p1"), name)
    }

    #[test_timeout::timeout]
    fn at_most_one_entry_is_active() {
        let sessions = vec![session("a", "bash"), session("b", "claude")];
        let mut summary = SessionSummary::default();
        summary.recompute(&sessions, Some(&SessionId::from("b")));
        let active: Vec<_> = summary.entries().iter().filter(|e| e.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "claude");

        summary.select(Some(&SessionId::from("a")));
        assert_eq!(summary.active().map(|e| e.id.as_str()), Some("a"));
        summary.select(None);
        assert!(summary.active().is_none());
    }

    #[test_timeout::timeout]
    fn local_insert_and_remove_skip_duplicates() {
        let mut summary = SessionSummary::default();
        summary.recompute(&[session("a", "bash")], None);
        let b = session("b", "claude");
        assert!(summary.insert(&b, Some(&b.id)));
        assert!(!summary.insert(&b, None));
        assert_eq!(summary.active().map(|e| e.id.as_str()), Some("b"));

        assert!(summary.remove(&SessionId::from("a")));
        assert!(!summary.remove(&SessionId::from("a")));
        assert_eq!(summary.len(), 1);
    }

    #[test_timeout::timeout]
    fn status_flips_report_changes_only() {
        let mut summary = SessionSummary::default();
        summary.recompute(&[session("a", "bash")], None);
        let id = SessionId::from("a");
        assert!(summary.set_status(&id, SessionStatus::Stopped));
        assert!(!summary.set_status(&id, SessionStatus::Stopped));
        assert!(!summary.set_status(&SessionId::from("zz"), SessionStatus::Stopped));
    }

    #[test_timeout::timeout]
    fn neighbour_wraps_in_both_directions() {
        let mut summary = SessionSummary::default();
        summary.recompute(&[session("a", "x"), session("b", "y"), session("c", "z")], None);
        let a = SessionId::from("a");
        let c = SessionId::from("c");
        assert_eq!(summary.neighbour(Some(&c), 1), Some(&a));
        assert_eq!(summary.neighbour(Some(&a), -1), Some(&c));
        assert_eq!(summary.neighbour(None, 1), Some(&a));
    }

    #[test_timeout::timeout]
    fn rendered_lines_mark_the_active_session() {
        let mut summary = SessionSummary::default();
        summary.recompute(&[session("a", "bash")], Some(&SessionId::from("a")));
        let lines = summary.render_lines();
        assert!(lines[0].starts_with("* a"));
        assert!(lines[0].ends_with("running"));
    }
}
