mod history_cleanup;
mod terminal_command;

pub use history_cleanup::ExecutionHistoryCleanup;
pub use terminal_command::TerminalCommand;
