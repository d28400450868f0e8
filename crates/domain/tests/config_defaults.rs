use cso_domain::config::Config;
use std::collections::HashSet;

fn sample_toml() -> &'static str {
    r#"
version = 1
initial_goal = "greet"

[goals.greet]
id = "greet"
description = "Greet the customer"
profile = "support"
terminal = true

[profiles.support]
id = "support"
identity = "You are a helpful support agent."

[tactics.friendly]
id = "friendly"
text = "Be warm and concise."
"#
}

#[test]
fn defaults_populate_when_section_omitted() {
    let known = HashSet::new();
    let config = Config::load(sample_toml(), &known).unwrap();
    assert_eq!(config.defaults.k_tools, 5);
    assert_eq!(config.defaults.t_turn_secs, 30);
    assert_eq!(config.defaults.history_window, 10);
}

#[test]
fn explicit_defaults_override() {
    let toml_str = format!(
        "{}\n[defaults]\nk_tools = 2\nt_turn_secs = 10\n",
        sample_toml()
    );
    let known = HashSet::new();
    let config = Config::load(&toml_str, &known).unwrap();
    assert_eq!(config.defaults.k_tools, 2);
    assert_eq!(config.defaults.t_turn_secs, 10);
}
