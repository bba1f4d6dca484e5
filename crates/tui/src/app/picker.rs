use blue_core::ModelId;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use uuid::Uuid;

use super::{input::InputLine, App};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickerKind {
    Model,
    Persona,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickerValue {
    Model(ModelId),
    Persona(Option<Uuid>),
}

#[derive(Clone, Debug)]
pub struct PickerItem {
    pub label: String,
    pub detail: String,
    pub value: PickerValue,
}

/// Filterable list popup.
pub struct PickerState {
    pub kind: PickerKind,
    pub query: InputLine,
    items: Vec<PickerItem>,
    pub filtered: Vec<usize>,
    pub selected: usize,
}

impl PickerState {
    pub fn new(kind: PickerKind, items: Vec<PickerItem>) -> Self {
        let mut st = Self {
            kind,
            query: InputLine::default(),
            items,
            filtered: Vec::new(),
            selected: 0,
        };
        st.refilter();
        st
    }

    pub fn refilter(&mut self) {
        let q = self.query.text().trim().to_lowercase();
        self.filtered = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, it)| {
                q.is_empty()
                    || it.label.to_lowercase().contains(&q)
                    || it.detail.to_lowercase().contains(&q)
            })
            .map(|(i, _)| i)
            .collect();
        self.selected = self.selected.min(self.filtered.len().saturating_sub(1));
    }

    pub fn visible(&self) -> impl Iterator<Item = &PickerItem> {
        self.filtered.iter().filter_map(|&i| self.items.get(i))
    }

    pub fn current(&self) -> Option<&PickerItem> {
        self.filtered.get(self.selected).and_then(|&i| self.items.get(i))
    }

    /// Moves the highlight onto the first item matching `value`.
    fn focus_value(&mut self, value: PickerValue) {
        if let Some(pos) = self
            .filtered
            .iter()
            .position(|&i| self.items.get(i).is_some_and(|it| it.value == value))
        {
            self.selected = pos;
        }
    }
}

impl App {
    pub fn open_model_picker(&mut self) {
        let items = ModelId::ALL
            .iter()
            .map(|m| {
                let info = m.info();
                PickerItem {
                    label: info.name.to_string(),
                    detail: format!("{}  {}  {}", m.as_str(), info.context_window, info.speed),
                    value: PickerValue::Model(*m),
                }
            })
            .collect();
        let mut st = PickerState::new(PickerKind::Model, items);
        st.focus_value(PickerValue::Model(self.model));
        self.picker = Some(st);
        self.dirty = true;
    }

    pub fn open_persona_picker(&mut self) {
        let mut items = vec![PickerItem {
            label: "No persona".to_string(),
            detail: "default assistant".to_string(),
            value: PickerValue::Persona(None),
        }];
        items.extend(self.personas.iter().map(|p| PickerItem {
            label: p.name.clone(),
            detail: p.model_id().info().name.to_string(),
            value: PickerValue::Persona(Some(p.id)),
        }));
        let mut st = PickerState::new(PickerKind::Persona, items);
        st.focus_value(PickerValue::Persona(self.persona));
        self.picker = Some(st);
        self.dirty = true;
    }

    pub(crate) fn on_picker_key(&mut self, key: KeyEvent) {
        let Some(st) = self.picker.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.picker = None,
            KeyCode::Enter => {
                let value = st.current().map(|it| it.value);
                self.picker = None;
                match value {
                    Some(PickerValue::Model(m)) => self.set_model(m),
                    Some(PickerValue::Persona(id)) => self.select_persona(id),
                    None => {}
                }
            }
            KeyCode::Up => st.selected = st.selected.saturating_sub(1),
            KeyCode::Down => {
                if st.selected + 1 < st.filtered.len() {
                    st.selected += 1;
                }
            }
            KeyCode::Backspace => {
                st.query.backspace();
                st.refilter();
            }
            KeyCode::Delete => {
                st.query.delete();
                st.refilter();
            }
            KeyCode::Left => st.query.left(),
            KeyCode::Right => st.query.right(),
            KeyCode::Home => st.query.home(),
            KeyCode::End => st.query.end(),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                st.query.insert_char(ch);
                st.refilter();
            }
            _ => {}
        }
    }
}
