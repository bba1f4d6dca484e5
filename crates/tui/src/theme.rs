use ratatui::style::Color;

pub struct Theme {
    pub border_focus: Color,
    pub border_inactive: Color,
    pub chat_border: Color,
    pub selected_fg: Color,
    pub selected_bg: Color,
    pub user: Color,
    pub assistant: Color,
    pub notice: Color,
    pub stopped: Color,
    pub title: Color,
    pub streaming: Color,
}

pub const THEME: Theme = Theme {
    border_focus: Color::Cyan,
    border_inactive: Color::DarkGray,
    chat_border: Color::DarkGray,
    selected_fg: Color::Black,
    selected_bg: Color::Cyan,
    user: Color::Blue,
    assistant: Color::Magenta,
    notice: Color::DarkGray,
    stopped: Color::Yellow,
    title: Color::Yellow,
    streaming: Color::Green,
};
