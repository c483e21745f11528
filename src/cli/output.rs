//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so every command
//! styles messages the same way.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::format::slot::Role;
use crate::vault::UserInfo;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print the user listing.  Usernames are one-way digests on disk, so
/// only a digest prefix can be shown.
pub fn print_users(users: &[UserInfo]) {
    if users.is_empty() {
        info("No active users.");
        return;
    }

    println!("{}", users_table(users));
}

fn users_table(users: &[UserInfo]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "User (digest)",
        "Role",
        "Token",
        "Must change",
        "Last login",
    ]);

    for u in users {
        let role = match u.role {
            Role::Administrator => "administrator",
            Role::Standard => "standard",
        };
        let last_login = if u.last_login_at == 0 {
            "never".to_string()
        } else {
            chrono::DateTime::from_timestamp(u.last_login_at, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        table.add_row(vec![
            u.digest_prefix.clone(),
            role.to_string(),
            if u.token_enrolled { "yes" } else { "no" }.to_string(),
            if u.must_change_password { "yes" } else { "no" }.to_string(),
            last_login,
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_table_renders_digest_role_and_login() {
        let users = vec![UserInfo {
            digest_prefix: "a1b2c3d4".into(),
            role: Role::Administrator,
            must_change_password: true,
            token_enrolled: false,
            password_changed_at: 0,
            last_login_at: 0,
        }];

        let rendered = users_table(&users).to_string();
        assert!(rendered.contains("a1b2c3d4"));
        assert!(rendered.contains("administrator"));
        assert!(rendered.contains("never"));
    }
}
