//! Tabela de regras determinísticas aplicada antes de qualquer chamada ao modelo.

use chrono::{Days, Local, NaiveDate};
use regex::Regex;

/// Transformação pura e determinística do texto bruto.
pub trait RuleTable: Send + Sync {
    fn apply_rules(&self, text: &str) -> String;

    /// Descrição das substituições de termos que afetaram `original`.
    fn matched_terms(&self, _original: &str, _processed: &str) -> Vec<String> {
        Vec::new()
    }
}

type Rule = (Regex, &'static str);

const WEEKDAYS: [(&str, &str); 10] = [
    (r"(?i)\bontem\b", "ontem"),
    (r"(?i)\bhoje\b", "hoje"),
    (r"(?i)\bamanhã\b", "amanhã"),
    (r"(?i)\bseg\b", "segunda-feira"),
    (r"(?i)\bter\b", "terça-feira"),
    (r"(?i)\bqua\b", "quarta-feira"),
    (r"(?i)\bqui\b", "quinta-feira"),
    (r"(?i)\bsex\b", "sexta-feira"),
    (r"(?i)\bsab\b", "sábado"),
    (r"(?i)\bdom\b", "domingo"),
];

const LOCATIONS: [(&str, &str); 6] = [
    (r"(?i)\bsp\b", "São Paulo"),
    (r"(?i)\brj\b", "Rio de Janeiro"),
    (r"(?i)\bbh\b", "Belo Horizonte"),
    (r"(?i)\bbsb\b", "Brasília"),
    (r"(?i)\bdatacenter\b", "data center"),
    (r"(?i)\bdc\b", "data center"),
];

const TECHNICAL: [(&str, &str); 7] = [
    (r"(?i)\bserver\b", "servidor"),
    (r"(?i)\bdatabase\b", "banco de dados"),
    (r"(?i)\bdb\b", "banco de dados"),
    (r"(?i)\bapi\b", "API"),
    (r"(?i)\burl\b", "URL"),
    (r"(?i)\bip\b", "IP"),
    (r"(?i)\bvpn\b", "VPN"),
];

const TYPOS: [(&str, &str); 4] = [
    (r"(?i)\bfalaha\b", "falha"),
    (r"(?i)\bservico\b", "serviço"),
    (r"(?i)\bindicponivel\b", "indisponível"),
    (r"(?i)\bfuncinando\b", "funcionando"),
];

const CLEANUP: [(&str, &str); 4] = [
    (r"\s+", " "),
    (r"\.{2,}", "."),
    (r",{2,}", ","),
    (r"\s+([,.!?;:])", "$1"),
];

const TIMES: [(&str, &str); 3] = [
    (r"\bàs\s+(\d{1,2})h\b", "às $1:00"),
    (r"\b(\d{1,2})h(\d{2})\b", "$1:$2"),
    (r"\b(\d{1,2})h\b", "$1:00"),
];

fn compile(table: &[(&str, &'static str)]) -> Result<Vec<Rule>, regex::Error> {
    let mut rules = Vec::with_capacity(table.len());
    for (pattern, replacement) in table {
        rules.push((Regex::new(pattern)?, *replacement));
    }
    Ok(rules)
}

/// Regras para descrições de incidentes em português do Brasil.
///
/// Ordem: limpeza de espaços e pontuação, dias da semana, cidades, termos
/// técnicos, erros de digitação, horários e por fim a expansão de
/// "hoje"/"ontem"/"amanhã" com a data absoluta entre parênteses.
pub struct PortugueseRules {
    cleanup: Vec<Rule>,
    terms: Vec<Rule>,
    technical: Vec<Rule>,
    times: Vec<Rule>,
    relative_days: Vec<(Regex, &'static str, i64)>,
    /// Data usada para expandir os dias relativos. `None` usa a data local atual.
    reference_date: Option<NaiveDate>,
}

impl PortugueseRules {
    pub fn new() -> Result<Self, regex::Error> {
        let technical = compile(&TECHNICAL)?;
        let mut terms = compile(&WEEKDAYS)?;
        terms.extend(compile(&LOCATIONS)?);
        terms.extend(technical.iter().cloned());
        terms.extend(compile(&TYPOS)?);

        Ok(Self {
            cleanup: compile(&CLEANUP)?,
            terms,
            technical,
            times: compile(&TIMES)?,
            relative_days: vec![
                (Regex::new(r"\bhoje\b")?, "hoje", 0),
                (Regex::new(r"\bontem\b")?, "ontem", -1),
                (Regex::new(r"\bamanhã\b")?, "amanhã", 1),
            ],
            reference_date: None,
        })
    }

    #[cfg(test)]
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    fn expand_relative_days(&self, text: &str) -> String {
        let today = self.today();
        let mut out = text.to_string();
        for (pattern, word, offset) in &self.relative_days {
            let date = if *offset < 0 {
                today.checked_sub_days(Days::new(offset.unsigned_abs()))
            } else {
                today.checked_add_days(Days::new(*offset as u64))
            };
            if let Some(date) = date {
                let replacement = format!("{word} ({})", date.format("%Y-%m-%d"));
                out = pattern.replace_all(&out, replacement.as_str()).into_owned();
            }
        }
        out
    }
}

fn apply(rules: &[Rule], text: String) -> String {
    rules.iter().fold(text, |acc, (pattern, replacement)| {
        pattern.replace_all(&acc, *replacement).into_owned()
    })
}

impl RuleTable for PortugueseRules {
    fn apply_rules(&self, text: &str) -> String {
        let cleaned = apply(&self.cleanup, text.trim().to_string());
        let cleaned = cleaned.trim().to_string();
        let replaced = apply(&self.terms, cleaned);
        let timed = apply(&self.times, replaced);
        self.expand_relative_days(&timed)
    }

    fn matched_terms(&self, original: &str, processed: &str) -> Vec<String> {
        self.technical
            .iter()
            .filter(|(pattern, replacement)| {
                pattern.is_match(original) && processed.contains(replacement)
            })
            .map(|(pattern, replacement)| {
                let raw = pattern.as_str().trim_start_matches("(?i)");
                format!("technical_term: {raw} -> {replacement}")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PortugueseRules {
        PortugueseRules::new()
            .unwrap()
            .with_reference_date(NaiveDate::from_ymd_opt(2025, 8, 24).unwrap())
    }

    #[test]
    fn cleans_whitespace_and_punctuation() {
        let out = rules().apply_rules("  falha   no  sistema ,, grave...  ");
        assert_eq!(out, "falha no sistema, grave.");
    }

    #[test]
    fn expands_abbreviations() {
        let out = rules().apply_rules("server do dc em sp caiu na sex");
        let expected = "servidor do data center em São Paulo caiu na sexta-feira";
        assert_eq!(out, expected);
    }

    #[test]
    fn fixes_typos_and_technical_terms() {
        let out = rules().apply_rules("falaha na api, servico indicponivel");
        assert_eq!(out, "falha na API, serviço indisponível");
    }

    #[test]
    fn normalizes_times() {
        let r = rules();
        assert_eq!(r.apply_rules("às 14h"), "às 14:00");
        assert_eq!(r.apply_rules("desde 9h30"), "desde 9:30");
        assert_eq!(r.apply_rules("até 18h"), "até 18:00");
    }

    #[test]
    fn expands_relative_days_with_reference_date() {
        let text = "Ontem às 14h o servidor caiu, hoje voltou e amanhã migra";
        let expected = "ontem (2025-08-23) às 14:00 o servidor caiu, hoje (2025-08-24) voltou \
            e amanhã (2025-08-25) migra";
        assert_eq!(rules().apply_rules(text), expected);
    }

    #[test]
    fn reports_technical_terms() {
        let r = rules();
        let original = "falha no db";
        let processed = r.apply_rules(original);
        let terms = r.matched_terms(original, &processed);
        let expected = r"technical_term: \bdb\b -> banco de dados";
        assert_eq!(terms, vec![expected.to_string()]);
    }
}
