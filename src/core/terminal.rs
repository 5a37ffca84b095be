use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_banner() {
    println!(
        "\n {}  {}\n",
        style("runway").cyan().bold(),
        style("Agent specifications, any backend.").dim()
    );
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("Thank you for using runway. See you next time!")
            .bold()
            .cyan()
    );
}

/// Colours a health state the same way everywhere it is printed.
pub fn health_label(state: &str) -> String {
    match state {
        "healthy" => style(state.to_uppercase()).green().bold().to_string(),
        "degraded" => style(state.to_uppercase()).yellow().bold().to_string(),
        "unavailable" => style(state.to_uppercase()).red().bold().to_string(),
        _ => style(state.to_uppercase()).dim().to_string(),
    }
}

enum Line {
    Command(String, String),
    Status(String, String),
    Text(String),
    Info(String),
    Warn(String),
    Blank,
}

/// A titled block of aligned lines, used for help screens and command results.
pub struct GuideSection {
    title: String,
    lines: Vec<Line>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(Line::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(Line::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(Line::Text(text.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(Line::Info(text.to_string()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines.push(Line::Warn(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(Line::Blank);
        self
    }

    pub fn render(&self) -> Vec<String> {
        let width = self
            .lines
            .iter()
            .map(|line| match line {
                Line::Command(name, _) => name.chars().count(),
                Line::Status(label, _) => label.chars().count() + 1,
                _ => 0,
            })
            .max()
            .unwrap_or(0);

        let mut out = vec![format!(" {}", style(&self.title).bold().underlined())];
        for line in &self.lines {
            out.push(match line {
                Line::Command(name, description) => format!(
                    "   {}  {}",
                    style(format!("{:<width$}", name)).green(),
                    description
                ),
                Line::Status(label, value) => format!(
                    "   {} {}",
                    style(format!("{:<width$}", format!("{label}:"))).bold().cyan(),
                    value
                ),
                Line::Text(text) => format!("   {}", text),
                Line::Info(text) => format!("   {} {}", INFO_ICON, style(text).blue()),
                Line::Warn(text) => format!("   {} {}", WARN_ICON, style(text).yellow()),
                Line::Blank => String::new(),
            });
        }
        out
    }

    pub fn print(self) {
        println!();
        for line in self.render() {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_align_commands() {
        console::set_colors_enabled(false);
        let lines = GuideSection::new("Agents")
            .command("list", "List active agents")
            .command("create", "Create an agent from a file")
            .blank()
            .render();
        assert_eq!(lines[0], " Agents");
        assert_eq!(lines[1], "   list    List active agents");
        assert_eq!(lines[2], "   create  Create an agent from a file");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn status_labels_get_a_colon() {
        console::set_colors_enabled(false);
        let lines = GuideSection::new("Gateway").status("PID", "42").render();
        assert_eq!(lines[1], "   PID: 42");
    }
}
