use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};

pub fn prompt(prompt: &str) -> Result<String> {
    let answer: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact_text()?;
    Ok(answer.trim().to_string())
}

pub fn prompt_yes_no(prompt: &str) -> Result<bool> {
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

pub fn prompt_select(prompt: &str, options: &[&str], default: usize) -> Result<usize> {
    Ok(Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(options)
        .default(default)
        .interact()?)
}

/// Ask until the answer is a number greater than zero.
pub fn prompt_positive_amount(prompt: &str) -> Result<f64> {
    loop {
        match parse_positive_amount(&self::prompt(prompt)?) {
            Ok(amount) => return Ok(amount),
            Err(reason) => println!("{reason}"),
        }
    }
}

pub(crate) fn parse_positive_amount(input: &str) -> Result<f64, &'static str> {
    let amount: f64 = input
        .trim()
        .trim_start_matches('$')
        .replace(',', "")
        .parse()
        .map_err(|_| "Please enter a valid number")?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err("Amount must be greater than 0");
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive_amount() {
        assert_eq!(parse_positive_amount("25"), Ok(25.0));
        assert_eq!(parse_positive_amount(" $1,000.50 "), Ok(1000.5));
        assert_eq!(parse_positive_amount("0"), Err("Amount must be greater than 0"));
        assert_eq!(parse_positive_amount("-3"), Err("Amount must be greater than 0"));
        assert_eq!(parse_positive_amount("ten"), Err("Please enter a valid number"));
    }
}
