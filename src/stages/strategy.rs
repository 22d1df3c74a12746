//! Escolha da estratégia de extração e montagem dos prompts.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

pub const EXTRACTOR_SYSTEM_PROMPT: &str = "Você é um especialista em extração de \
informações de incidentes de TI. Sua função é extrair com precisão: data/hora de ocorrência, \
local do incidente, tipo de incidente e impacto. Sempre responda em formato JSON estruturado e \
em português brasileiro. Seja preciso e consistente.";

const STANDARD_TEMPLATE: &str = "Analise o seguinte texto sobre um incidente de TI e \
extraia as informações solicitadas:\n\n\
Texto: {text}\n\n\
Extraia as seguintes informações em formato JSON:\n\
- data_ocorrencia: Data e hora no formato YYYY-MM-DD HH:MM\n\
- local: Local onde ocorreu o incidente\n\
- tipo_incidente: Tipo/categoria do incidente\n\
- impacto: Descrição do impacto causado\n\n\
Resposta JSON:";

const CONTEXTUAL_TEMPLATE: &str = "Você é um especialista em análise de incidentes de TI. \
Analise cuidadosamente o seguinte relato e extraia as informações estruturadas.\n\n\
Contexto: Este é um relato de incidente de TI que precisa ser processado para \
documentação e análise.\n\n\
Texto do incidente: {text}\n\n\
Instruções de extração:\n\
1. Identifique quando o incidente ocorreu (data_ocorrencia no formato YYYY-MM-DD HH:MM)\n\
2. Determine onde aconteceu (local)\n\
3. Classifique o tipo de incidente (tipo_incidente)\n\
4. Descreva o impacto causado (impacto)\n\n\
Forneça APENAS a resposta em JSON válido:\n";

const RETRY_TEMPLATE: &str = "IMPORTANTE: A extração anterior falhou. \
Por favor, seja mais cuidadoso.\n\n\
Texto do incidente: {text}\n\n\
Extraia OBRIGATORIAMENTE as seguintes informações e retorne APENAS JSON válido:\n\
{\n  \"data_ocorrencia\": \"YYYY-MM-DD HH:MM ou null\",\n  \"local\": \"string ou null\",\n  \
\"tipo_incidente\": \"string ou null\",\n  \"impacto\": \"string ou null\"\n}\n\n\
JSON:";

/// Prompt usado a cada tentativa, do mais simples ao mais rígido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    Standard,
    Contextual,
    Retry,
}

impl ExtractionStrategy {
    /// 1 → standard, 2 → contextual, 3 ou mais → retry.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => ExtractionStrategy::Standard,
            2 => ExtractionStrategy::Contextual,
            _ => ExtractionStrategy::Retry,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Standard => "standard",
            ExtractionStrategy::Contextual => "contextual",
            ExtractionStrategy::Retry => "retry",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            ExtractionStrategy::Standard => STANDARD_TEMPLATE,
            ExtractionStrategy::Contextual => CONTEXTUAL_TEMPLATE,
            ExtractionStrategy::Retry => RETRY_TEMPLATE,
        }
    }

    /// Prompt completo: bloco de datas seguido do template com o texto.
    pub fn build_prompt(&self, text: &str, dates: &DateContext) -> String {
        let body = self.template().replace("{text}", text);
        format!("{}\n\n{body}", dates.render())
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Datas de referência para o modelo resolver expressões como "ontem" ou
/// "sexta passada".
#[derive(Debug, Clone, Copy)]
pub struct DateContext {
    now: NaiveDateTime,
}

impl DateContext {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now }
    }

    pub fn now_local() -> Self {
        Self::new(chrono::Local::now().naive_local())
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    pub fn yesterday(&self) -> NaiveDate {
        let today = self.today();
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    }

    pub fn tomorrow(&self) -> NaiveDate {
        let today = self.today();
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }

    /// Última ocorrência de `weekday` estritamente antes de hoje (1 a 7 dias atrás).
    pub fn last(&self, weekday: Weekday) -> NaiveDate {
        let today = self.today();
        let current = today.weekday().num_days_from_monday() as i64;
        let target = weekday.num_days_from_monday() as i64;
        let mut back = (current - target).rem_euclid(7);
        if back == 0 {
            back = 7;
        }
        today
            .checked_sub_days(Days::new(back as u64))
            .unwrap_or(today)
    }

    pub fn render(&self) -> String {
        format!(
            "Contexto temporal:\n\
             - Data e hora atual: {} ({})\n\
             - Ontem: {}\n\
             - Amanhã: {}\n\
             - Sexta-feira passada: {}",
            self.now.format("%Y-%m-%d %H:%M"),
            weekday_pt(self.today().weekday()),
            self.yesterday().format("%Y-%m-%d"),
            self.tomorrow().format("%Y-%m-%d"),
            self.last(Weekday::Fri).format("%Y-%m-%d"),
        )
    }
}

pub fn weekday_pt(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(y: i32, m: u32, d: u32) -> DateContext {
        let now = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        DateContext::new(now)
    }

    #[test]
    fn strategy_by_attempt() {
        use ExtractionStrategy::{Contextual, Retry, Standard};

        assert_eq!(ExtractionStrategy::for_attempt(1), Standard);
        assert_eq!(ExtractionStrategy::for_attempt(2), Contextual);
        assert_eq!(ExtractionStrategy::for_attempt(3), Retry);
        assert_eq!(ExtractionStrategy::for_attempt(5), Retry);
        assert_eq!(ExtractionStrategy::for_attempt(5).as_str(), "retry");
    }

    #[test]
    fn prompts_embed_text_and_dates() {
        let dates = ctx(2025, 8, 24);
        let strategy = ExtractionStrategy::Standard;
        let prompt = strategy.build_prompt("falha no servidor", &dates);
        assert!(prompt.starts_with("Contexto temporal:"));
        assert!(prompt.contains("Texto: falha no servidor"));
        assert!(prompt.ends_with("Resposta JSON:"));

        let retry = ExtractionStrategy::Retry.build_prompt("x", &dates);
        assert!(retry.contains("\"impacto\": \"string ou null\""));
        assert!(!retry.contains("{text}"));
    }

    #[test]
    fn date_context_values() {
        // 2025-08-24 é um domingo.
        let dates = ctx(2025, 8, 24);
        let rendered = dates.render();
        assert!(rendered.contains("2025-08-24 10:30 (domingo)"));
        assert!(rendered.contains("Ontem: 2025-08-23"));
        assert!(rendered.contains("Amanhã: 2025-08-25"));
        assert!(rendered.contains("Sexta-feira passada: 2025-08-22"));
    }

    #[test]
    fn last_weekday_is_strictly_before_today() {
        // 2025-08-22 é uma sexta-feira.
        let friday = ctx(2025, 8, 22);
        assert_eq!(
            friday.last(Weekday::Fri),
            NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()
        );
        let saturday = ctx(2025, 8, 23);
        assert_eq!(
            saturday.last(Weekday::Fri),
            NaiveDate::from_ymd_opt(2025, 8, 22).unwrap()
        );
    }
}
