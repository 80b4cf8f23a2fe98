use std::collections::BTreeSet;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;

use crate::config::{EngineSettings, MAX_HISTORY_WINDOW_DAYS};
use crate::db::queries;
use crate::errors::BookingError;
use crate::models::{
    format_price, Appointment, AppointmentSource, CancelCandidate, CancelCandidates,
    CancelOutcome, NewAppointment, PendingConfirmation, Provider, ServiceSnapshot, Session,
    SessionState, SessionStep, TimeSelection,
};
use crate::services::booking;
use crate::services::grammar::{self, Command, DayChoice, InputError};
use crate::services::slots;
use crate::state::AppState;

/// One inbound text, already stripped of its transport envelope.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub provider_id: String,
    pub customer_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: SessionState,
    pub replies: Vec<String>,
}

/// Applies one conversation turn.
///
/// The whole turn (session load, any appointment insert or cancel, session
/// save) runs in a single transaction while the connection lock is held, so
/// turns for the same customer never interleave. Double booking is prevented
/// by the storage index regardless. Replies are returned, not sent: the caller
/// delivers them after the new state is committed.
pub fn process_message(state: &AppState, inbound: &InboundMessage) -> anyhow::Result<TurnOutcome> {
    let now = state.clock.now();

    let mut db = state.db()?;
    let tx = db.transaction().context("failed to begin turn transaction")?;

    let provider = queries::get_provider(&tx, &inbound.provider_id)?
        .with_context(|| format!("unknown provider: {}", inbound.provider_id))?;

    queries::touch_customer(&tx, &provider.id, &inbound.customer_id, now)?;

    let mut session = queries::get_session(&tx, &provider.id, &inbound.customer_id)?
        .unwrap_or_else(|| Session::new(&provider.id, &inbound.customer_id, now));
    let from_state = session.state();

    let turn = Turn {
        conn: &tx,
        provider: &provider,
        customer_id: &inbound.customer_id,
        settings: &state.config.engine,
        now,
    };
    let (next, replies) = turn.apply(session.step, &inbound.text)?;

    session.step = next;
    session.last_interaction_at = now;
    queries::save_session(&tx, &session)?;
    tx.commit().context("failed to commit turn")?;

    tracing::info!(
        provider = %provider.id,
        customer = %inbound.customer_id,
        from = from_state.as_str(),
        to = session.state().as_str(),
        "processed message"
    );

    Ok(TurnOutcome {
        state: session.state(),
        replies,
    })
}

type Transition = (SessionStep, Vec<String>);

struct Turn<'a> {
    conn: &'a Connection,
    provider: &'a Provider,
    customer_id: &'a str,
    settings: &'a EngineSettings,
    now: DateTime<Utc>,
}

impl Turn<'_> {
    fn apply(&self, step: SessionStep, raw: &str) -> anyhow::Result<Transition> {
        let command = grammar::parse(step.state(), raw);

        let transition = match (step, command) {
            (_, Ok(Command::Reset)) => (SessionStep::Menu, vec![self.menu_text()]),

            (SessionStep::Menu, Ok(Command::Book)) => self.list_services()?,
            (SessionStep::Menu, Ok(Command::MyAppointments)) => self.my_appointments()?,
            (SessionStep::Menu, Ok(Command::Cancel)) => self.start_cancel()?,
            (SessionStep::Menu, _) => (
                SessionStep::Menu,
                vec![format!("Anlayamadım.\n\n{}", self.menu_text())],
            ),

            (SessionStep::ChooseService, Ok(Command::PickService(n))) => self.pick_service(n)?,
            (SessionStep::ChooseService, _) => self.list_services()?,

            (SessionStep::ChooseDate(service), Ok(Command::PickDay(day))) => {
                self.pick_day(service, day)?
            }
            (SessionStep::ChooseDate(service), _) => {
                let prompt = format!("Lütfen 1 veya 2 yaz.\n\n{}", self.date_prompt(&service));
                (SessionStep::ChooseDate(service), vec![prompt])
            }

            (SessionStep::ChooseTime(selection), Ok(Command::PickTime(n))) => {
                self.pick_time(selection, Some(n))?
            }
            (SessionStep::ChooseTime(selection), _) => self.pick_time(selection, None)?,

            (SessionStep::Confirm(pending), Ok(Command::Yes)) => self.confirm(pending)?,
            (SessionStep::Confirm(_), Ok(Command::No)) => (
                SessionStep::Menu,
                vec![format!("Randevu oluşturulmadı.\n\n{}", self.menu_text())],
            ),
            (SessionStep::Confirm(pending), _) => {
                let prompt = format!("Lütfen E veya H yaz.\n\n{}", self.summary(&pending));
                (SessionStep::Confirm(pending), vec![prompt])
            }

            (SessionStep::CancelWait(candidates), Ok(Command::CancelByIndex(n))) => {
                self.cancel_by_index(candidates, n)?
            }
            (SessionStep::CancelWait(candidates), Ok(Command::CancelByCode(code))) => {
                self.cancel_by_code(candidates, &code)?
            }
            (SessionStep::CancelWait(candidates), Err(InputError::CodeTooShort)) => {
                let prompt = format!(
                    "Kod en az 4 karakter olmalı.\n\n{}",
                    render_candidates(self.provider, &candidates)
                );
                (SessionStep::CancelWait(candidates), vec![prompt])
            }
            (SessionStep::CancelWait(candidates), _) => {
                let prompt = render_candidates(self.provider, &candidates);
                (SessionStep::CancelWait(candidates), vec![prompt])
            }
        };

        Ok(transition)
    }

    // ── MENU ──

    fn list_services(&self) -> anyhow::Result<Transition> {
        let services = queries::list_active_services(self.conn, &self.provider.id)?;
        if services.is_empty() {
            return Ok((
                SessionStep::Menu,
                vec![format!(
                    "Şu anda aktif hizmet bulunmuyor.\n\n{}",
                    self.menu_text()
                )],
            ));
        }

        let mut text = String::from("Hizmet seç:\n");
        for (i, service) in services.iter().enumerate() {
            text.push_str(&format!(
                "S{}) {} — {} dk — {}\n",
                i + 1,
                service.name,
                service.duration_minutes,
                format_price(service.price)
            ));
        }
        text.push_str("\nÖrnek: S1");

        Ok((SessionStep::ChooseService, vec![text]))
    }

    fn customer_appointments(&self, limit: usize) -> anyhow::Result<Vec<Appointment>> {
        let window = Duration::try_days(self.settings.history_window_days)
            .unwrap_or_else(|| Duration::days(MAX_HISTORY_WINDOW_DAYS));
        let since = self.now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        queries::list_customer_appointments(
            self.conn,
            &self.provider.id,
            self.customer_id,
            since,
            limit,
        )
    }

    fn my_appointments(&self) -> anyhow::Result<Transition> {
        let appointments = self.customer_appointments(self.settings.my_appointments_limit)?;
        if appointments.is_empty() {
            return Ok((
                SessionStep::Menu,
                vec![format!("Kayıtlı randevun yok.\n\n{}", self.menu_text())],
            ));
        }

        let mut text = String::from("Randevuların:\n");
        for (i, appointment) in appointments.iter().enumerate() {
            text.push_str(&format!(
                "{}) {} — {} (Kod: {})\n",
                i + 1,
                self.format_instant(appointment.start_time),
                appointment.service.service_name,
                appointment.cancel_code
            ));
        }
        text.push_str("\nİptal için 3 yaz.");

        Ok((SessionStep::Menu, vec![text]))
    }

    fn start_cancel(&self) -> anyhow::Result<Transition> {
        let appointments = self.customer_appointments(self.settings.cancel_candidates_limit)?;
        if appointments.is_empty() {
            return Ok((
                SessionStep::Menu,
                vec![format!(
                    "İptal edilecek randevun yok.\n\n{}",
                    self.menu_text()
                )],
            ));
        }

        let candidates = CancelCandidates {
            candidates: appointments
                .into_iter()
                .map(|a| CancelCandidate {
                    appointment_id: a.id,
                    cancel_code: a.cancel_code,
                    service_name: a.service.service_name,
                    start_time: a.start_time,
                })
                .collect(),
        };
        let text = render_candidates(self.provider, &candidates);

        Ok((SessionStep::CancelWait(candidates), vec![text]))
    }

    // ── CHOOSE_SERVICE / CHOOSE_DATE ──

    fn pick_service(&self, position: usize) -> anyhow::Result<Transition> {
        let services = queries::list_active_services(self.conn, &self.provider.id)?;
        match services.get(position - 1) {
            Some(service) => {
                let snapshot = service.snapshot();
                let prompt = self.date_prompt(&snapshot);
                Ok((SessionStep::ChooseDate(snapshot), vec![prompt]))
            }
            None => self.list_services(),
        }
    }

    fn today(&self) -> NaiveDate {
        self.provider.to_local(self.now).date()
    }

    fn date_prompt(&self, service: &ServiceSnapshot) -> String {
        let today = self.today();
        let tomorrow = today + Duration::days(1);
        format!(
            "{} için tarih seç:\n1) Bugün ({})\n2) Yarın ({})",
            service.service_name,
            today.format("%d.%m"),
            tomorrow.format("%d.%m")
        )
    }

    fn pick_day(&self, service: ServiceSnapshot, day: DayChoice) -> anyhow::Result<Transition> {
        let date = match day {
            DayChoice::Today => self.today(),
            DayChoice::Tomorrow => self.today() + Duration::days(1),
        };

        let slots = self.available_slots(&service, date)?;
        if slots.is_empty() {
            let prompt = format!(
                "Bu gün için uygun saat kalmadı.\n\n{}",
                self.date_prompt(&service)
            );
            return Ok((SessionStep::ChooseDate(service), vec![prompt]));
        }

        let text = self.render_slots(&slots);
        Ok((
            SessionStep::ChooseTime(TimeSelection {
                service,
                date,
                slots: Some(slots),
            }),
            vec![text],
        ))
    }

    /// Free start instants for the service on the local `date`, with already
    /// elapsed ones dropped, capped at the listing limit.
    fn available_slots(
        &self,
        service: &ServiceSnapshot,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        let (day_start, day_end) = slots::local_day_bounds(date);
        let taken: BTreeSet<_> = queries::taken_start_times(
            self.conn,
            &self.provider.id,
            self.provider.to_utc(day_start),
            self.provider.to_utc(day_end),
        )?
        .into_iter()
        .map(|t| self.provider.to_local(t))
        .collect();

        let now_local = self.provider.to_local(self.now);
        let free = slots::generate_start_slots(
            date,
            &self.provider.working_hours,
            self.settings.slot_step_minutes,
            service.duration_minutes,
            &taken,
        );

        Ok(free
            .into_iter()
            .filter(|t| *t > now_local)
            .take(self.settings.max_listed_slots)
            .map(|t| self.provider.to_utc(t))
            .collect())
    }

    // ── CHOOSE_TIME ──

    /// Resolves `position` against the cached list, recomputing it when the
    /// session lost it. `None` or an out-of-range position re-lists. A cached
    /// list with elapsed entries is replaced and re-shown before any pick, so
    /// positions never shift under the customer.
    fn pick_time(
        &self,
        selection: TimeSelection,
        position: Option<usize>,
    ) -> anyhow::Result<Transition> {
        let TimeSelection { service, date, slots } = selection;
        let slots = match slots {
            Some(slots) if slots.iter().all(|t| *t > self.now) => slots,
            Some(_) => {
                return self.reselect_time(service, date, "Bazı saatler geçti.");
            }
            None => {
                tracing::debug!(customer = %self.customer_id, "slot list missing, recomputing");
                self.available_slots(&service, date)?
            }
        };

        if slots.is_empty() {
            let prompt = format!(
                "Bu gün için uygun saat kalmadı.\n\n{}",
                self.date_prompt(&service)
            );
            return Ok((SessionStep::ChooseDate(service), vec![prompt]));
        }

        let chosen = position.and_then(|n| slots.get(n - 1)).copied();
        match chosen {
            Some(start_time) => {
                let pending = PendingConfirmation {
                    service,
                    date,
                    start_time,
                };
                let text = self.summary(&pending);
                Ok((SessionStep::Confirm(pending), vec![text]))
            }
            None => {
                let text = format!("Geçersiz seçim.\n\n{}", self.render_slots(&slots));
                Ok((
                    SessionStep::ChooseTime(TimeSelection {
                        service,
                        date,
                        slots: Some(slots),
                    }),
                    vec![text],
                ))
            }
        }
    }

    /// Fresh slot list for `date` after the previous one went stale. Falls
    /// back to date selection when the day has nothing left.
    fn reselect_time(
        &self,
        service: ServiceSnapshot,
        date: NaiveDate,
        notice: &str,
    ) -> anyhow::Result<Transition> {
        let slots = self.available_slots(&service, date)?;
        if slots.is_empty() {
            let prompt = format!(
                "{notice} Bu gün için başka uygun saat kalmadı.\n\n{}",
                self.date_prompt(&service)
            );
            return Ok((SessionStep::ChooseDate(service), vec![prompt]));
        }

        let text = format!(
            "{notice} Lütfen yeni bir saat seç.\n\n{}",
            self.render_slots(&slots)
        );
        Ok((
            SessionStep::ChooseTime(TimeSelection {
                service,
                date,
                slots: Some(slots),
            }),
            vec![text],
        ))
    }

    fn render_slots(&self, slots: &[DateTime<Utc>]) -> String {
        let mut text = String::from("Saat seç:\n");
        for (i, slot) in slots.iter().enumerate() {
            text.push_str(&format!(
                "T{}) {}\n",
                i + 1,
                self.provider.to_local(*slot).format("%H:%M")
            ));
        }
        text.push_str("\nÖrnek: T1");
        text
    }

    // ── CONFIRM ──

    fn summary(&self, pending: &PendingConfirmation) -> String {
        format!(
            "Randevu özeti:\nHizmet: {}\nTarih: {}\nÜcret: {}\n\nOnaylıyor musun? E) Evet / H) Hayır",
            pending.service.service_name,
            self.format_instant(pending.start_time),
            format_price(pending.service.price)
        )
    }

    fn confirm(&self, pending: PendingConfirmation) -> anyhow::Result<Transition> {
        if pending.start_time <= self.now {
            tracing::info!(
                customer = %self.customer_id,
                start = %pending.start_time,
                "confirmation for elapsed slot"
            );
            return self.reselect_time(
                pending.service,
                pending.date,
                "Bu saat geçti.",
            );
        }

        let request = NewAppointment {
            provider_id: self.provider.id.clone(),
            customer_id: self.customer_id.to_string(),
            service: pending.service.clone(),
            start_time: pending.start_time,
            source: AppointmentSource::Whatsapp,
        };

        match booking::book_appointment(self.conn, &request, self.now) {
            Ok(appointment) => {
                tracing::info!(
                    provider = %self.provider.id,
                    customer = %self.customer_id,
                    appointment = %appointment.id,
                    start = %appointment.start_time,
                    "appointment created"
                );
                queries::record_customer_visit(
                    self.conn,
                    &self.provider.id,
                    self.customer_id,
                    appointment.start_time,
                    self.now,
                )?;
                let text = format!(
                    "Randevun onaylandı ✅\nHizmet: {}\nTarih: {}\nİptal kodu: {}\n\nİptal için menüden 3'ü seçip bu kodu yazabilirsin.",
                    appointment.service.service_name,
                    self.format_instant(appointment.start_time),
                    appointment.cancel_code
                );
                Ok((SessionStep::Menu, vec![text]))
            }
            Err(BookingError::SlotTaken) => {
                tracing::warn!(
                    provider = %self.provider.id,
                    customer = %self.customer_id,
                    start = %pending.start_time,
                    "slot taken concurrently"
                );
                let PendingConfirmation { service, date, .. } = pending;
                self.reselect_time(
                    service,
                    date,
                    "Üzgünüm, bu saat az önce doldu.",
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── CANCEL_WAIT ──

    fn cancel_by_index(
        &self,
        candidates: CancelCandidates,
        position: usize,
    ) -> anyhow::Result<Transition> {
        let Some(candidate) = candidates.candidates.get(position - 1) else {
            let prompt = format!(
                "Geçersiz numara.\n\n{}",
                render_candidates(self.provider, &candidates)
            );
            return Ok((SessionStep::CancelWait(candidates), vec![prompt]));
        };

        let found = queries::find_cancellable_by_id(
            self.conn,
            &self.provider.id,
            self.customer_id,
            &candidate.appointment_id,
        )?;
        self.finish_cancel(candidates, found)
    }

    fn cancel_by_code(
        &self,
        candidates: CancelCandidates,
        code: &str,
    ) -> anyhow::Result<Transition> {
        let found = queries::find_cancellable_by_code(
            self.conn,
            &self.provider.id,
            self.customer_id,
            code,
        )?;
        self.finish_cancel(candidates, found)
    }

    fn finish_cancel(
        &self,
        candidates: CancelCandidates,
        found: Option<Appointment>,
    ) -> anyhow::Result<Transition> {
        let Some(appointment) = found else {
            let prompt = format!(
                "Randevu bulunamadı. Numara veya iptal kodunu kontrol et.\n\n{}",
                render_candidates(self.provider, &candidates)
            );
            return Ok((SessionStep::CancelWait(candidates), vec![prompt]));
        };

        let outcome =
            queries::cancel_appointment(self.conn, &self.provider.id, &appointment.id, self.now)?;
        let text = match outcome {
            CancelOutcome::Canceled => {
                tracing::info!(
                    provider = %self.provider.id,
                    customer = %self.customer_id,
                    appointment = %appointment.id,
                    "appointment canceled"
                );
                format!(
                    "Randevun iptal edildi: {} — {}\n\n{}",
                    self.format_instant(appointment.start_time),
                    appointment.service.service_name,
                    self.menu_text()
                )
            }
            CancelOutcome::AlreadyCanceled | CancelOutcome::NotFound => {
                format!("Bu randevu zaten iptal edilmiş.\n\n{}", self.menu_text())
            }
        };
        Ok((SessionStep::Menu, vec![text]))
    }

    // ── Rendering ──

    fn menu_text(&self) -> String {
        format!(
            "{} — online randevu\n1) Randevu al\n2) Randevularım\n3) Randevu iptal\n\nBaşa dönmek için istediğin zaman \"menu\" yaz.",
            self.provider.name
        )
    }

    fn format_instant(&self, instant: DateTime<Utc>) -> String {
        format_local(self.provider, instant)
    }
}

fn format_local(provider: &Provider, instant: DateTime<Utc>) -> String {
    provider.to_local(instant).format("%d.%m.%Y %H:%M").to_string()
}

fn render_candidates(provider: &Provider, candidates: &CancelCandidates) -> String {
    let mut text =
        String::from("İptal etmek istediğin randevunun numarasını veya iptal kodunu yaz:\n");
    for (i, c) in candidates.candidates.iter().enumerate() {
        text.push_str(&format!(
            "{}) {} — {} (Kod: {})\n",
            i + 1,
            format_local(provider, c.start_time),
            c.service_name,
            c.cancel_code
        ));
    }
    text.trim_end().to_string()
}
